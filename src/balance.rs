use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::schemas::{Balance, Expense, Group, MemberId};

/// Net position per member: positive is owed to the member, negative owes.
pub type Balances = BTreeMap<MemberId, Decimal>;

/// Recomputes every member's net from scratch: what they paid minus what they
/// owe across `expenses`.
///
/// Every member in `members` has an entry, zero if untouched. Payers or
/// participants outside `members` are still counted, so the total always nets
/// to zero.
pub fn compute_balances<'a, I>(members: &[MemberId], expenses: I) -> Balances
where
    I: IntoIterator<Item = &'a Expense>,
{
    let mut balances: Balances = members
        .iter()
        .map(|member| (member.clone(), Decimal::ZERO))
        .collect();

    let mut counted = 0usize;
    for expense in expenses {
        counted += 1;
        if !balances.contains_key(&expense.payer) {
            warn!(expense = %expense.id, payer = %expense.payer, "payer is not a group member");
        }
        *balances.entry(expense.payer.clone()).or_insert(Decimal::ZERO) += expense.amount;

        for (participant, share) in &expense.shares {
            if !balances.contains_key(participant) {
                warn!(expense = %expense.id, %participant, "participant is not a group member");
            }
            *balances.entry(participant.clone()).or_insert(Decimal::ZERO) -= *share;
        }
    }

    debug!(
        members = balances.len(),
        expenses = counted,
        "recomputed balances"
    );
    balances
}

/// Balance records for `group`, in member order, from the group's own
/// expenses only.
pub fn group_balances(group: &Group, expenses: &[Expense]) -> Vec<Balance> {
    let own = expenses
        .iter()
        .filter(|expense| expense.group_id == group.id);
    let balances = compute_balances(&group.members, own);

    group
        .members
        .iter()
        .map(|member| Balance {
            member: member.clone(),
            group: group.id.clone(),
            net: balances.get(member).copied().unwrap_or(Decimal::ZERO),
        })
        .collect()
}

/// Sum of all nets; zero for any closed group.
pub fn total(balances: &Balances) -> Decimal {
    balances.values().copied().sum()
}
