use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::InvalidSplitError;
use crate::split::{Shares, SplitCalculator};

/// Largest supported minor-unit exponent.
pub const MAX_EXPONENT: u32 = 8;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Opaque member identifier, unique within a group. Ordering by id is the
    /// tie-break everywhere a deterministic order is needed.
    MemberId
);
string_id!(GroupId);
string_id!(ExpenseId);
string_id!(SettlementId);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Currency {
    pub code: String,
    /// Number of decimal places in the minor unit (2 for paise or cents).
    pub exponent: u32,
}

impl Currency {
    pub fn new(code: impl Into<String>, exponent: u32) -> Self {
        Self {
            code: code.into().to_uppercase(),
            exponent,
        }
    }

    /// Value of one minor unit, e.g. `0.01` for a two-decimal currency.
    pub fn minor_unit(&self) -> Decimal {
        Decimal::new(1, self.exponent)
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::new("INR", 2)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitStrategy {
    Equal,
    Exact,
    Percentage,
    Shares,
}

/// How an expense's amount is divided among its participants. Detail maps are
/// keyed by participant and must cover exactly the participant set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "strategy", content = "details", rename_all = "lowercase")]
pub enum Split {
    #[default]
    Equal,
    /// Currency amounts per participant.
    Exact(BTreeMap<MemberId, Decimal>),
    /// Percentages per participant, summing to 100.
    Percentage(BTreeMap<MemberId, Decimal>),
    /// Integer weights per participant.
    Shares(BTreeMap<MemberId, u32>),
}

impl Split {
    pub fn strategy(&self) -> SplitStrategy {
        match self {
            Split::Equal => SplitStrategy::Equal,
            Split::Exact(_) => SplitStrategy::Exact,
            Split::Percentage(_) => SplitStrategy::Percentage,
            Split::Shares(_) => SplitStrategy::Shares,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseCategory {
    FoodAndDining,
    Transportation,
    Shopping,
    Entertainment,
    BillsAndUtilities,
    Travel,
    Healthcare,
    Education,
    PersonalCare,
    HomeAndGarden,
    Gifts,
    Groceries,
    Rent,
    Insurance,
    #[default]
    Other,
}

impl ExpenseCategory {
    pub fn label(self) -> &'static str {
        match self {
            ExpenseCategory::FoodAndDining => "Food & Dining",
            ExpenseCategory::Transportation => "Transportation",
            ExpenseCategory::Shopping => "Shopping",
            ExpenseCategory::Entertainment => "Entertainment",
            ExpenseCategory::BillsAndUtilities => "Bills & Utilities",
            ExpenseCategory::Travel => "Travel",
            ExpenseCategory::Healthcare => "Healthcare",
            ExpenseCategory::Education => "Education",
            ExpenseCategory::PersonalCare => "Personal Care",
            ExpenseCategory::HomeAndGarden => "Home & Garden",
            ExpenseCategory::Gifts => "Gifts",
            ExpenseCategory::Groceries => "Groceries",
            ExpenseCategory::Rent => "Rent",
            ExpenseCategory::Insurance => "Insurance",
            ExpenseCategory::Other => "Other",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupCategory {
    Trip,
    Home,
    Couple,
    Friends,
    Family,
    #[default]
    Other,
}

/// An expense as submitted by the caller, before its shares are resolved.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ExpenseDraft {
    pub description: String,
    #[serde(default)]
    pub category: ExpenseCategory,
    pub amount: Decimal,
    pub payer: MemberId,
    pub participants: BTreeSet<MemberId>,
    #[serde(default)]
    pub split: Split,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ExpenseDraft {
    /// Equal split among `participants`, dated on creation.
    pub fn new<M, I>(
        description: impl Into<String>,
        amount: Decimal,
        payer: M,
        participants: I,
    ) -> Self
    where
        M: Into<MemberId>,
        I: IntoIterator,
        I::Item: Into<MemberId>,
    {
        Self {
            description: description.into(),
            category: ExpenseCategory::default(),
            amount,
            payer: payer.into(),
            participants: participants.into_iter().map(Into::into).collect(),
            split: Split::Equal,
            date: None,
            tags: Vec::new(),
            notes: None,
        }
    }

    pub fn with_split(mut self, split: Split) -> Self {
        self.split = split;
        self
    }

    pub fn with_category(mut self, category: ExpenseCategory) -> Self {
        self.category = category;
        self
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub group_id: GroupId,
    pub description: String,
    pub category: ExpenseCategory,
    pub amount: Decimal,
    pub payer: MemberId,
    pub participants: BTreeSet<MemberId>,
    pub split: Split,
    /// Resolved owed amount per participant; always sums to `amount`.
    pub shares: Shares,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Expense {
    /// Resolves the draft's split with `calculator`, stamping both timestamps
    /// with `now`.
    pub fn from_draft(
        id: ExpenseId,
        group_id: GroupId,
        draft: ExpenseDraft,
        calculator: &SplitCalculator,
        now: DateTime<Utc>,
    ) -> Result<Self, InvalidSplitError> {
        let shares = calculator.compute(draft.amount, &draft.split, &draft.participants)?;
        Ok(Self {
            id,
            group_id,
            description: draft.description,
            category: draft.category,
            amount: draft.amount,
            payer: draft.payer,
            participants: draft.participants,
            split: draft.split,
            shares,
            date: draft.date.unwrap_or_else(|| now.date_naive()),
            created_at: now,
            updated_at: now,
            tags: draft.tags,
            notes: draft.notes,
        })
    }

    /// What `member` owes for this expense; zero for non-participants.
    pub fn share_of(&self, member: &MemberId) -> Decimal {
        self.shares.get(member).copied().unwrap_or(Decimal::ZERO)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub members: Vec<MemberId>,
    pub currency: Currency,
    pub category: GroupCategory,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn has_member(&self, member: &MemberId) -> bool {
        self.members.contains(member)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub members: Vec<MemberId>,
    /// Falls back to the book's configured currency.
    #[serde(default)]
    pub currency: Option<Currency>,
    #[serde(default)]
    pub category: GroupCategory,
}

impl NewGroup {
    pub fn new<I>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<MemberId>,
    {
        Self {
            name: name.into(),
            description: None,
            members: members.into_iter().map(Into::into).collect(),
            currency: None,
            category: GroupCategory::default(),
        }
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }

    pub fn with_category(mut self, category: GroupCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Fields of a group that may change after creation. Membership changes go
/// through `SplitBook::add_member` / `SplitBook::remove_member`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct GroupPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<GroupCategory>,
    pub is_active: Option<bool>,
}

/// A member's net position within a group. Positive means the member is owed.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Balance {
    pub member: MemberId,
    pub group: GroupId,
    pub net: Decimal,
}

/// A suggested transfer from a debtor to a creditor.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settlement {
    pub from: MemberId,
    pub to: MemberId,
    pub amount: Decimal,
}

impl Settlement {
    pub fn new(from: impl Into<MemberId>, to: impl Into<MemberId>, amount: Decimal) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            amount,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Completed,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SettlementDraft {
    pub from: MemberId,
    pub to: MemberId,
    pub amount: Decimal,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

impl SettlementDraft {
    pub fn new(from: impl Into<MemberId>, to: impl Into<MemberId>, amount: Decimal) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            amount,
            description: String::new(),
            payment_method: None,
            date: None,
        }
    }

    pub fn with_payment_method(mut self, method: impl Into<String>) -> Self {
        self.payment_method = Some(method.into());
        self
    }
}

impl From<&Settlement> for SettlementDraft {
    fn from(settlement: &Settlement) -> Self {
        Self::new(settlement.from.clone(), settlement.to.clone(), settlement.amount)
    }
}

/// A payment between members that the group has recorded. Only completed
/// records move balances.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SettlementRecord {
    pub id: SettlementId,
    pub group_id: GroupId,
    pub from: MemberId,
    pub to: MemberId,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub date: NaiveDate,
    pub status: SettlementStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
}

impl SettlementRecord {
    pub fn as_settlement(&self) -> Settlement {
        Settlement::new(self.from.clone(), self.to.clone(), self.amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn split_is_tagged_by_strategy() {
        let split = Split::Exact(BTreeMap::from([(MemberId::from("A"), dec!(20.50))]));
        assert_eq!(
            serde_json::to_value(&split).unwrap(),
            json!({ "strategy": "exact", "details": { "A": "20.50" } })
        );
        assert_eq!(serde_json::to_value(Split::Equal).unwrap(), json!({ "strategy": "equal" }));

        let raw = json!({ "strategy": "shares", "details": { "A": 2, "B": 1 } });
        let parsed: Split = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.strategy(), SplitStrategy::Shares);
    }

    #[test]
    fn currency_code_is_normalized() {
        let currency = Currency::new("usd", 2);
        assert_eq!(currency.code, "USD");
        assert_eq!(currency.minor_unit(), dec!(0.01));
    }

    #[test]
    fn categories_use_snake_case() {
        assert_eq!(
            serde_json::to_value(ExpenseCategory::FoodAndDining).unwrap(),
            json!("food_and_dining")
        );
        assert_eq!(ExpenseCategory::BillsAndUtilities.label(), "Bills & Utilities");
        assert_eq!(ExpenseCategory::default(), ExpenseCategory::Other);
    }
}
