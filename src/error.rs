use rust_decimal::Decimal;
use thiserror::Error;

use crate::schemas::{ExpenseId, GroupId, MemberId, SettlementId, SettlementStatus};

/// Malformed or inconsistent split input. Always the caller's to correct.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidSplitError {
    #[error("an expense needs at least one participant")]
    NoParticipants,
    #[error("amount {0} must not be negative")]
    NegativeAmount(Decimal),
    #[error("{0} is more precise than the currency's minor unit")]
    SubMinorUnit(Decimal),
    #[error("{0} does not fit in minor units")]
    AmountOutOfRange(Decimal),
    #[error("split details have no entry for participant {0}")]
    MissingParticipant(MemberId),
    #[error("split details name {0}, who is not a participant")]
    UnknownParticipant(MemberId),
    #[error("share for {0} must not be negative")]
    NegativeShare(MemberId),
    #[error("exact shares sum to {actual}, expected {expected}")]
    ExactSumMismatch { expected: Decimal, actual: Decimal },
    #[error("percentages sum to {0}, expected 100")]
    PercentageSumMismatch(Decimal),
    #[error("split weights sum to zero")]
    ZeroWeights,
}

/// Balances that do not net to zero. Indicates corrupted input upstream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("balances sum to {residual}, expected zero")]
pub struct UnbalancedGroupError {
    pub residual: Decimal,
}

#[derive(Debug, Error)]
pub enum BookError {
    #[error(transparent)]
    InvalidSplit(#[from] InvalidSplitError),
    #[error(transparent)]
    Unbalanced(#[from] UnbalancedGroupError),
    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),
    #[error("Expense not found: {0}")]
    ExpenseNotFound(ExpenseId),
    #[error("Settlement not found: {0}")]
    SettlementNotFound(SettlementId),
    #[error("{member} is not a member of {group}")]
    NotAMember { member: MemberId, group: GroupId },
    #[error("{member} is listed twice in {group}")]
    DuplicateMember { member: MemberId, group: GroupId },
    #[error("{member} still appears in expenses or settlements of {group}")]
    MemberInUse { member: MemberId, group: GroupId },
    #[error("a group needs at least one member")]
    EmptyGroup,
    #[error("Invalid payment: {0}")]
    InvalidPayment(String),
    #[error("settlement {id} is {status:?} and can no longer change")]
    InvalidTransition {
        id: SettlementId,
        status: SettlementStatus,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("Inconsistent snapshot: {0}")]
    InconsistentSnapshot(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("currency exponent {0} is not supported")]
    UnsupportedExponent(u32),
    #[error("{name} tolerance must not be negative, got {value}")]
    NegativeTolerance { name: &'static str, value: Decimal },
}
