use std::collections::BTreeMap;
use std::mem::swap;

use rust_decimal::Decimal;
use tracing::{debug, error};

use crate::balance::{total, Balances};
use crate::error::UnbalancedGroupError;
use crate::schemas::{Expense, MemberId, Settlement};

#[derive(Clone, Debug)]
struct PersonalBalance {
    id: MemberId,
    balance: Decimal,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
struct UserPair {
    user1: MemberId,
    user2: MemberId,
}

/// Reduces net balances to a short list of debtor -> creditor transfers.
///
/// Greedy: the largest debtor pays the largest creditor `min(debt, credit)`
/// until nobody is left. Ties pick the smaller member id. Zero balances, and
/// balances with an absolute value below `epsilon`, count as settled.
pub fn reduce_to_settlements(
    balances: &Balances,
    epsilon: Decimal,
) -> Result<Vec<Settlement>, UnbalancedGroupError> {
    let residual = total(balances);
    if !is_negligible(residual, epsilon) {
        error!(%residual, "balances do not net to zero");
        return Err(UnbalancedGroupError { residual });
    }

    // Divide people into payers and receivers
    let mut payers = Vec::new();
    let mut receivers = Vec::new();
    for (id, balance) in balances {
        if is_negligible(*balance, epsilon) {
            continue;
        }
        let person = PersonalBalance {
            id: id.clone(),
            balance: balance.abs(),
        };
        if balance.is_sign_negative() {
            payers.push(person);
        } else {
            receivers.push(person);
        }
    }

    let settlements = get_simplified_balances(payers, receivers, epsilon);
    debug!(transfers = settlements.len(), "reduced balances to settlements");
    Ok(settlements)
}

fn get_simplified_balances(
    mut payers: Vec<PersonalBalance>,
    mut receivers: Vec<PersonalBalance>,
    epsilon: Decimal,
) -> Vec<Settlement> {
    let mut settlements = Vec::new();

    loop {
        sort_largest_last(&mut payers);
        sort_largest_last(&mut receivers);
        let (Some(payer), Some(receiver)) = (payers.last_mut(), receivers.last_mut()) else {
            break;
        };

        let amount = payer.balance.min(receiver.balance);
        settlements.push(Settlement {
            from: payer.id.clone(),
            to: receiver.id.clone(),
            amount,
        });
        payer.balance -= amount;
        receiver.balance -= amount;

        let payer_done = is_negligible(payer.balance, epsilon);
        let receiver_done = is_negligible(receiver.balance, epsilon);
        if payer_done {
            payers.pop();
        }
        if receiver_done {
            receivers.pop();
        }
    }
    settlements
}

// Ascending by amount, descending by id, so `last` is the largest balance with
// the smallest id.
fn sort_largest_last(people: &mut [PersonalBalance]) {
    people.sort_by(|a, b| a.balance.cmp(&b.balance).then_with(|| b.id.cmp(&a.id)));
}

// Exact zero always counts, so a zero epsilon still accepts balanced input.
fn is_negligible(value: Decimal, epsilon: Decimal) -> bool {
    value.is_zero() || value.abs() < epsilon
}

/// Applies transfers to `balances`: each debtor's net rises by the amount and
/// each creditor's falls by it.
pub fn apply_settlements(balances: &Balances, settlements: &[Settlement]) -> Balances {
    let mut next = balances.clone();
    for settlement in settlements {
        *next.entry(settlement.from.clone()).or_insert(Decimal::ZERO) += settlement.amount;
        *next.entry(settlement.to.clone()).or_insert(Decimal::ZERO) -= settlement.amount;
    }
    next
}

/// The transfers that settle every payer/participant pair directly, without
/// any simplification. `payments` already made between members are netted in.
pub fn pairwise_settlements<'a, I>(expenses: I, payments: &[Settlement]) -> Vec<Settlement>
where
    I: IntoIterator<Item = &'a Expense>,
{
    let mut balances_between_people: BTreeMap<UserPair, Decimal> = BTreeMap::new();

    for expense in expenses {
        for (participant, share) in &expense.shares {
            if *participant == expense.payer {
                continue;
            }
            record_debt(&mut balances_between_people, &expense.payer, participant, *share);
        }
    }
    // A payment from `from` to `to` works like `to` owing `from`.
    for payment in payments {
        record_debt(&mut balances_between_people, &payment.from, &payment.to, payment.amount);
    }

    // Calculate exchanges, now the ones that were paid for will be the payers
    let mut settlements = Vec::new();
    for (people_pair, balance) in balances_between_people {
        if balance.is_zero() {
            continue;
        }
        let mut from = people_pair.user2;
        let mut to = people_pair.user1;
        // If the balance is smaller than zero we change the direction
        if balance.is_sign_negative() {
            swap(&mut from, &mut to);
        }
        settlements.push(Settlement {
            from,
            to,
            amount: balance.abs(),
        });
    }
    settlements
}

fn record_debt(
    pairs: &mut BTreeMap<UserPair, Decimal>,
    creditor: &MemberId,
    debtor: &MemberId,
    amount: Decimal,
) {
    let mut pair = UserPair {
        user1: creditor.clone(),
        user2: debtor.clone(),
    };
    let mut amount = amount;

    // We use id order to ensure all the debts regarding the same members end
    // up stored in the same direction
    if pair.user1 > pair.user2 {
        swap(&mut pair.user1, &mut pair.user2);
        amount = -amount;
    }

    *pairs.entry(pair).or_insert(Decimal::ZERO) += amount;
}

/// The greedy reduction of `balances`, unless settling pair by pair would
/// take strictly fewer transfers.
///
/// `balances` must be the outcome of `expenses` with `payments` applied.
pub fn plan_settlements<'a, I>(
    balances: &Balances,
    expenses: I,
    payments: &[Settlement],
    epsilon: Decimal,
) -> Result<Vec<Settlement>, UnbalancedGroupError>
where
    I: IntoIterator<Item = &'a Expense>,
{
    let simplified = reduce_to_settlements(balances, epsilon)?;
    let naive = pairwise_settlements(expenses, payments);

    // We ensure the simplification didn't accidentally end up being
    // more complicated than the naive exchanges
    if naive.len() < simplified.len() {
        debug!(
            pairwise = naive.len(),
            greedy = simplified.len(),
            "pairwise settlement is shorter"
        );
        Ok(naive)
    } else {
        Ok(simplified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::compute_balances;
    use crate::schemas::{Currency, ExpenseDraft, ExpenseId, GroupId};
    use crate::split::SplitCalculator;
    use chrono::Utc;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    const EPSILON: Decimal = dec!(0.01);

    fn balances(entries: &[(&str, Decimal)]) -> Balances {
        entries
            .iter()
            .map(|(id, net)| (MemberId::from(*id), *net))
            .collect()
    }

    fn transfers(entries: &[(&str, &str, Decimal)]) -> Vec<Settlement> {
        entries
            .iter()
            .map(|(from, to, amount)| Settlement::new(*from, *to, *amount))
            .collect()
    }

    fn expense(id: &str, amount: Decimal, payer: &str, participants: &[&str]) -> Expense {
        let calculator = SplitCalculator::new(&Currency::default());
        Expense::from_draft(
            ExpenseId::from(id),
            GroupId::from("g"),
            ExpenseDraft::new(id, amount, payer, participants.iter().copied()),
            &calculator,
            Utc::now(),
        )
        .unwrap()
    }

    #[rstest]
    #[case::single_pair(&[("A", dec!(10)), ("B", dec!(-10))], &[("B", "A", dec!(10))])]
    #[case::one_debtor_two_creditors(
        &[("A", dec!(5)), ("B", dec!(5)), ("C", dec!(-10))],
        &[("C", "A", dec!(5)), ("C", "B", dec!(5))]
    )]
    #[case::three_way_even_split(
        &[("A", dec!(66.66)), ("B", dec!(-33.33)), ("C", dec!(-33.33))],
        &[("B", "A", dec!(33.33)), ("C", "A", dec!(33.33))]
    )]
    #[case::largest_first(
        &[("A", dec!(4)), ("B", dec!(3)), ("C", dec!(3)), ("D", dec!(-6)), ("E", dec!(-4))],
        &[("D", "A", dec!(4)), ("E", "B", dec!(3)), ("D", "C", dec!(2)), ("E", "C", dec!(1))]
    )]
    #[case::settled_members_dropped(
        &[("A", dec!(0)), ("B", dec!(0.001)), ("C", dec!(-0.001))],
        &[]
    )]
    #[case::empty(&[], &[])]
    fn reduces_balances_greedily(
        #[case] entries: &[(&str, Decimal)],
        #[case] expected: &[(&str, &str, Decimal)],
    ) {
        let nets = balances(entries);
        let settlements = reduce_to_settlements(&nets, EPSILON).unwrap();
        assert_eq!(settlements, transfers(expected));

        let after = apply_settlements(&nets, &settlements);
        assert!(after.values().all(|net| net.abs() < EPSILON));
    }

    #[test]
    fn rejects_unbalanced_input() {
        let nets = balances(&[("A", dec!(10)), ("B", dec!(-9))]);
        assert_eq!(
            reduce_to_settlements(&nets, EPSILON),
            Err(UnbalancedGroupError { residual: dec!(1) })
        );
    }

    #[rstest]
    #[case::single_pair(&[("A", dec!(10)), ("B", dec!(-10))], &[("B", "A", dec!(10))])]
    #[case::tiny_balances_kept(
        &[("A", dec!(0.001)), ("B", dec!(-0.001)), ("C", dec!(0))],
        &[("B", "A", dec!(0.001))]
    )]
    #[case::all_settled(&[("A", dec!(0)), ("B", dec!(0))], &[])]
    fn zero_epsilon_requires_exact_balance(
        #[case] entries: &[(&str, Decimal)],
        #[case] expected: &[(&str, &str, Decimal)],
    ) {
        let nets = balances(entries);
        let settlements = reduce_to_settlements(&nets, Decimal::ZERO).unwrap();
        assert_eq!(settlements, transfers(expected));
        assert!(apply_settlements(&nets, &settlements).values().all(Decimal::is_zero));
    }

    #[test]
    fn zero_epsilon_rejects_any_residual() {
        let nets = balances(&[("A", dec!(10)), ("B", dec!(-9.999))]);
        assert_eq!(
            reduce_to_settlements(&nets, Decimal::ZERO),
            Err(UnbalancedGroupError { residual: dec!(0.001) })
        );
    }

    #[test]
    fn tolerates_residual_below_epsilon() {
        let nets = balances(&[("A", dec!(10)), ("B", dec!(-9.995))]);
        let settlements = reduce_to_settlements(&nets, EPSILON).unwrap();
        assert_eq!(settlements, transfers(&[("B", "A", dec!(9.995))]));
    }

    #[test]
    fn one_minor_unit_is_not_rounded_away() {
        let nets = balances(&[("A", dec!(0.01)), ("B", dec!(-0.01))]);
        let settlements = reduce_to_settlements(&nets, EPSILON).unwrap();
        assert_eq!(settlements, transfers(&[("B", "A", dec!(0.01))]));
    }

    #[test]
    fn pairwise_nets_opposite_debts() {
        let expenses = vec![
            expense("lunch", dec!(20), "A", &["A", "B"]),
            expense("coffee", dec!(6), "B", &["A", "B"]),
        ];
        assert_eq!(
            pairwise_settlements(&expenses, &[]),
            transfers(&[("B", "A", dec!(7))])
        );
    }

    #[test]
    fn pairwise_accounts_for_payments() {
        let expenses = vec![expense("lunch", dec!(20), "A", &["A", "B"])];
        let paid = transfers(&[("B", "A", dec!(4))]);
        assert_eq!(
            pairwise_settlements(&expenses, &paid),
            transfers(&[("B", "A", dec!(6))])
        );

        let paid_in_full = transfers(&[("B", "A", dec!(10))]);
        assert!(pairwise_settlements(&expenses, &paid_in_full).is_empty());
    }

    #[test]
    fn plan_prefers_pairwise_when_shorter() {
        let expenses = vec![
            expense("museum", dec!(4), "A", &["E"]),
            expense("boat", dec!(3), "B", &["D"]),
            expense("train", dec!(3), "C", &["D"]),
        ];
        let members: Vec<MemberId> =
            ["A", "B", "C", "D", "E"].into_iter().map(MemberId::from).collect();
        let nets = compute_balances(&members, &expenses);

        assert_eq!(reduce_to_settlements(&nets, EPSILON).unwrap().len(), 4);
        assert_eq!(
            plan_settlements(&nets, &expenses, &[], EPSILON).unwrap(),
            transfers(&[("E", "A", dec!(4)), ("D", "B", dec!(3)), ("D", "C", dec!(3))])
        );
    }

    #[test]
    fn plan_keeps_greedy_when_it_simplifies() {
        let expenses = vec![
            expense("hotel", dec!(90), "A", &["A", "B", "C"]),
            expense("fuel", dec!(30), "B", &["B", "C"]),
        ];
        let members: Vec<MemberId> = ["A", "B", "C"].into_iter().map(MemberId::from).collect();
        let nets = compute_balances(&members, &expenses);

        // A +60, B -15, C -45: pairwise needs B->A, C->A, C->B.
        assert_eq!(pairwise_settlements(&expenses, &[]).len(), 3);
        assert_eq!(
            plan_settlements(&nets, &expenses, &[], EPSILON).unwrap(),
            transfers(&[("C", "A", dec!(45)), ("B", "A", dec!(15))])
        );
    }
}
