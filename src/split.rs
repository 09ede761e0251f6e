use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::error::InvalidSplitError;
use crate::money::Money;
use crate::schemas::{Currency, MemberId, Split};

/// Owed amount per participant for a single expense.
pub type Shares = BTreeMap<MemberId, Decimal>;

pub const DEFAULT_PERCENTAGE_TOLERANCE: Decimal = dec!(0.01);

/// Divides an expense amount among participants in one currency.
///
/// Every successful result sums exactly to the amount, in minor units.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitCalculator {
    exponent: u32,
    percentage_tolerance: Decimal,
}

impl SplitCalculator {
    pub fn new(currency: &Currency) -> Self {
        Self {
            exponent: currency.exponent,
            percentage_tolerance: DEFAULT_PERCENTAGE_TOLERANCE,
        }
    }

    pub fn with_percentage_tolerance(mut self, tolerance: Decimal) -> Self {
        self.percentage_tolerance = tolerance;
        self
    }

    pub fn compute(
        &self,
        amount: Decimal,
        split: &Split,
        participants: &BTreeSet<MemberId>,
    ) -> Result<Shares, InvalidSplitError> {
        if participants.is_empty() {
            return Err(InvalidSplitError::NoParticipants);
        }
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(InvalidSplitError::NegativeAmount(amount));
        }
        let total = Money::from_decimal(amount, self.exponent)?;

        let allocation = match split {
            Split::Equal => split_equally(total, participants),
            Split::Exact(details) => self.split_exactly(total, details, participants)?,
            Split::Percentage(details) => self.split_by_percentage(total, details, participants)?,
            Split::Shares(weights) => {
                check_keys(weights, participants)?;
                let weights: BTreeMap<MemberId, i128> = weights
                    .iter()
                    .map(|(member, weight)| (member.clone(), i128::from(*weight)))
                    .collect();
                allocate_weighted(total, &weights, amount)?
            }
        };

        debug_assert_eq!(allocation.values().copied().sum::<Money>(), total);
        debug!(
            strategy = ?split.strategy(),
            %amount,
            participants = participants.len(),
            "computed split"
        );

        Ok(allocation
            .into_iter()
            .map(|(member, share)| (member, share.to_decimal(self.exponent)))
            .collect())
    }

    fn split_exactly(
        &self,
        total: Money,
        details: &BTreeMap<MemberId, Decimal>,
        participants: &BTreeSet<MemberId>,
    ) -> Result<BTreeMap<MemberId, Money>, InvalidSplitError> {
        check_keys(details, participants)?;
        let mut allocation = BTreeMap::new();
        for (member, value) in details {
            let share = Money::from_decimal(*value, self.exponent)?;
            if share.is_negative() {
                return Err(InvalidSplitError::NegativeShare(member.clone()));
            }
            allocation.insert(member.clone(), share);
        }

        let actual = allocation
            .values()
            .try_fold(Money::ZERO, |sum, share| sum.checked_add(*share))
            .ok_or(InvalidSplitError::AmountOutOfRange(total.to_decimal(self.exponent)))?;
        if actual != total {
            return Err(InvalidSplitError::ExactSumMismatch {
                expected: total.to_decimal(self.exponent),
                actual: actual.to_decimal(self.exponent),
            });
        }
        Ok(allocation)
    }

    fn split_by_percentage(
        &self,
        total: Money,
        details: &BTreeMap<MemberId, Decimal>,
        participants: &BTreeSet<MemberId>,
    ) -> Result<BTreeMap<MemberId, Money>, InvalidSplitError> {
        check_keys(details, participants)?;
        let negative = details
            .iter()
            .find(|(_, pct)| pct.is_sign_negative() && !pct.is_zero());
        if let Some((member, _)) = negative {
            return Err(InvalidSplitError::NegativeShare(member.clone()));
        }
        let percent_total = details
            .values()
            .try_fold(Decimal::ZERO, |sum, pct| sum.checked_add(*pct))
            .ok_or(InvalidSplitError::AmountOutOfRange(total.to_decimal(self.exponent)))?;
        if (percent_total - dec!(100)).abs() > self.percentage_tolerance {
            return Err(InvalidSplitError::PercentageSumMismatch(percent_total));
        }

        // Bring every percentage to a common integer scale.
        let scale = details
            .values()
            .map(|pct| pct.normalize().scale())
            .max()
            .unwrap_or(0);
        let amount = total.to_decimal(self.exponent);
        let mut weights = BTreeMap::new();
        for (member, pct) in details {
            let normalized = pct.normalize();
            let weight = 10i128
                .checked_pow(scale - normalized.scale())
                .and_then(|factor| normalized.mantissa().checked_mul(factor))
                .ok_or(InvalidSplitError::AmountOutOfRange(amount))?;
            weights.insert(member.clone(), weight);
        }
        allocate_weighted(total, &weights, amount)
    }
}

/// `compute` with the default percentage tolerance.
pub fn compute_split(
    amount: Decimal,
    split: &Split,
    participants: &BTreeSet<MemberId>,
    currency: &Currency,
) -> Result<Shares, InvalidSplitError> {
    SplitCalculator::new(currency).compute(amount, split, participants)
}

/// Integer division in minor units. The remainder goes one unit at a time to
/// the first participants in id order.
fn split_equally(total: Money, participants: &BTreeSet<MemberId>) -> BTreeMap<MemberId, Money> {
    let count = participants.len() as i64;
    let base = total.minor_units() / count;
    let remainder = total.minor_units() % count;

    participants
        .iter()
        .enumerate()
        .map(|(idx, member)| {
            let extra = if (idx as i64) < remainder { 1 } else { 0 };
            (member.clone(), Money::from_minor(base + extra))
        })
        .collect()
}

/// Largest-remainder allocation of `total` proportional to `weights`.
/// Leftover minor units go to the largest fractional parts, ties by id.
fn allocate_weighted(
    total: Money,
    weights: &BTreeMap<MemberId, i128>,
    amount: Decimal,
) -> Result<BTreeMap<MemberId, Money>, InvalidSplitError> {
    let weight_total: i128 = weights.values().sum();
    if weight_total == 0 {
        return Err(InvalidSplitError::ZeroWeights);
    }

    let units = i128::from(total.minor_units());
    let mut allocation = BTreeMap::new();
    let mut remainders = Vec::with_capacity(weights.len());
    let mut allocated = 0i128;
    for (member, weight) in weights {
        let product = units
            .checked_mul(*weight)
            .ok_or(InvalidSplitError::AmountOutOfRange(amount))?;
        let base = product / weight_total;
        allocated += base;
        remainders.push((product % weight_total, member));
        let base = i64::try_from(base).map_err(|_| InvalidSplitError::AmountOutOfRange(amount))?;
        allocation.insert(member.clone(), Money::from_minor(base));
    }

    // Stable sort keeps id order among equal remainders.
    remainders.sort_by(|a, b| b.0.cmp(&a.0));
    let leftover = (units - allocated) as usize;
    for (_, member) in remainders.into_iter().take(leftover) {
        if let Some(share) = allocation.get_mut(member) {
            *share += Money::from_minor(1);
        }
    }
    Ok(allocation)
}

fn check_keys<V>(
    details: &BTreeMap<MemberId, V>,
    participants: &BTreeSet<MemberId>,
) -> Result<(), InvalidSplitError> {
    if let Some(missing) = participants.iter().find(|m| !details.contains_key(*m)) {
        return Err(InvalidSplitError::MissingParticipant(missing.clone()));
    }
    if let Some(unknown) = details.keys().find(|m| !participants.contains(*m)) {
        return Err(InvalidSplitError::UnknownParticipant(unknown.clone()));
    }
    Ok(())
}
