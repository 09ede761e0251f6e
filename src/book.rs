use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::balance::{compute_balances, group_balances, Balances};
use crate::config::{validate_currency, EngineConfig};
use crate::error::BookError;
use crate::exchange::{apply_settlements, plan_settlements};
use crate::money::Money;
use crate::schemas::{
    Balance, Expense, ExpenseDraft, ExpenseId, Group, GroupId, GroupPatch, MemberId, NewGroup,
    Settlement, SettlementDraft, SettlementId, SettlementRecord, SettlementStatus,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Sequence {
    groups: u64,
    expenses: u64,
    settlements: u64,
}

/// Application state: groups, their expenses and recorded payments.
///
/// Balances are never stored; every query recomputes them from the current
/// expense list of the group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitBook {
    #[serde(default)]
    config: EngineConfig,
    groups: BTreeMap<GroupId, Group>,
    expenses: Vec<Expense>,
    settlements: Vec<SettlementRecord>,
    #[serde(default)]
    sequence: Sequence,
}

impl SplitBook {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn add_group(&mut self, new_group: NewGroup) -> Result<GroupId, BookError> {
        if new_group.members.is_empty() {
            return Err(BookError::EmptyGroup);
        }
        let currency = new_group
            .currency
            .unwrap_or_else(|| self.config.currency.clone());
        validate_currency(&currency)?;

        let id = GroupId::new(format!("group-{}", self.sequence.groups + 1));
        let mut seen = BTreeSet::new();
        for member in &new_group.members {
            if !seen.insert(member) {
                return Err(BookError::DuplicateMember {
                    member: member.clone(),
                    group: id,
                });
            }
        }
        self.sequence.groups += 1;

        let now = Utc::now();
        let group = Group {
            id: id.clone(),
            name: new_group.name,
            description: new_group.description,
            members: new_group.members,
            currency,
            category: new_group.category,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        info!(group = %id, members = group.members.len(), "group created");
        self.groups.insert(id.clone(), group);
        Ok(id)
    }

    pub fn group(&self, id: &GroupId) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn update_group(&mut self, id: &GroupId, patch: GroupPatch) -> Result<&Group, BookError> {
        let group = self
            .groups
            .get_mut(id)
            .ok_or_else(|| BookError::GroupNotFound(id.clone()))?;
        if let Some(name) = patch.name {
            group.name = name;
        }
        if let Some(description) = patch.description {
            group.description = Some(description);
        }
        if let Some(category) = patch.category {
            group.category = category;
        }
        if let Some(is_active) = patch.is_active {
            group.is_active = is_active;
        }
        group.updated_at = Utc::now();
        info!(group = %id, "group updated");
        Ok(group)
    }

    pub fn add_member(
        &mut self,
        id: &GroupId,
        member: impl Into<MemberId>,
    ) -> Result<(), BookError> {
        let member = member.into();
        let group = self
            .groups
            .get_mut(id)
            .ok_or_else(|| BookError::GroupNotFound(id.clone()))?;
        if group.has_member(&member) {
            return Err(BookError::DuplicateMember {
                member,
                group: id.clone(),
            });
        }
        info!(group = %id, %member, "member added");
        group.members.push(member);
        group.updated_at = Utc::now();
        Ok(())
    }

    /// Refused while the member is payer or participant of any expense, or
    /// party to any settlement record, of the group.
    pub fn remove_member(&mut self, id: &GroupId, member: &MemberId) -> Result<(), BookError> {
        let in_use = self
            .group_expenses(id)
            .any(|expense| expense.payer == *member || expense.participants.contains(member))
            || self
                .settlement_records(id)
                .any(|record| record.from == *member || record.to == *member);

        let group = self
            .groups
            .get_mut(id)
            .ok_or_else(|| BookError::GroupNotFound(id.clone()))?;
        if !group.has_member(member) {
            return Err(BookError::NotAMember {
                member: member.clone(),
                group: id.clone(),
            });
        }
        if in_use {
            return Err(BookError::MemberInUse {
                member: member.clone(),
                group: id.clone(),
            });
        }
        group.members.retain(|m| m != member);
        group.updated_at = Utc::now();
        info!(group = %id, %member, "member removed");
        Ok(())
    }

    /// Removes the group with all of its expenses and settlement records.
    pub fn delete_group(&mut self, id: &GroupId) -> Result<Group, BookError> {
        let group = self
            .groups
            .remove(id)
            .ok_or_else(|| BookError::GroupNotFound(id.clone()))?;
        self.expenses.retain(|expense| expense.group_id != *id);
        self.settlements.retain(|record| record.group_id != *id);
        info!(group = %id, "group deleted");
        Ok(group)
    }

    pub fn add_expense(
        &mut self,
        group_id: &GroupId,
        draft: ExpenseDraft,
    ) -> Result<ExpenseId, BookError> {
        let group = self.group_ref(group_id)?;
        check_expense_members(group, &draft)?;
        let calculator = self.config.calculator_for(&group.currency);

        let id = ExpenseId::new(format!("exp-{}", self.sequence.expenses + 1));
        let expense =
            Expense::from_draft(id.clone(), group_id.clone(), draft, &calculator, Utc::now())?;
        self.sequence.expenses += 1;

        info!(
            group = %group_id,
            expense = %id,
            amount = %expense.amount,
            strategy = ?expense.split.strategy(),
            "expense added"
        );
        self.expenses.push(expense);
        Ok(id)
    }

    /// Replaces the expense's content and split in full. Its id, group and
    /// creation time are kept.
    pub fn update_expense(
        &mut self,
        id: &ExpenseId,
        draft: ExpenseDraft,
    ) -> Result<&Expense, BookError> {
        let index = self
            .expenses
            .iter()
            .position(|expense| expense.id == *id)
            .ok_or_else(|| BookError::ExpenseNotFound(id.clone()))?;
        let group_id = self.expenses[index].group_id.clone();
        let created_at = self.expenses[index].created_at;

        let group = self.group_ref(&group_id)?;
        check_expense_members(group, &draft)?;
        let calculator = self.config.calculator_for(&group.currency);
        let mut replacement =
            Expense::from_draft(id.clone(), group_id, draft, &calculator, Utc::now())?;
        replacement.created_at = created_at;

        info!(expense = %id, amount = %replacement.amount, "expense updated");
        self.expenses[index] = replacement;
        Ok(&self.expenses[index])
    }

    pub fn delete_expense(&mut self, id: &ExpenseId) -> Result<Expense, BookError> {
        let index = self
            .expenses
            .iter()
            .position(|expense| expense.id == *id)
            .ok_or_else(|| BookError::ExpenseNotFound(id.clone()))?;
        info!(expense = %id, "expense deleted");
        Ok(self.expenses.remove(index))
    }

    pub fn expense(&self, id: &ExpenseId) -> Option<&Expense> {
        self.expenses.iter().find(|expense| expense.id == *id)
    }

    pub fn group_expenses<'a>(
        &'a self,
        group_id: &'a GroupId,
    ) -> impl Iterator<Item = &'a Expense> + 'a {
        self.expenses
            .iter()
            .filter(move |expense| expense.group_id == *group_id)
    }

    /// Net per member from the group's expenses alone.
    pub fn balances(&self, group_id: &GroupId) -> Result<Balances, BookError> {
        let group = self.group_ref(group_id)?;
        Ok(compute_balances(&group.members, self.group_expenses(group_id)))
    }

    pub fn group_balances(&self, group_id: &GroupId) -> Result<Vec<Balance>, BookError> {
        let group = self.group_ref(group_id)?;
        Ok(group_balances(group, &self.expenses))
    }

    /// Balances after completed settlement records are applied.
    pub fn outstanding_balances(&self, group_id: &GroupId) -> Result<Balances, BookError> {
        let balances = self.balances(group_id)?;
        Ok(apply_settlements(&balances, &self.completed_payments(group_id)))
    }

    /// Transfers that would clear the group's outstanding balances.
    pub fn suggested_settlements(&self, group_id: &GroupId) -> Result<Vec<Settlement>, BookError> {
        let outstanding = self.outstanding_balances(group_id)?;
        let group = self.group_ref(group_id)?;
        let payments = self.completed_payments(group_id);
        let epsilon = self.config.settlement_epsilon(&group.currency);
        Ok(plan_settlements(
            &outstanding,
            self.group_expenses(group_id),
            &payments,
            epsilon,
        )?)
    }

    /// Records a payment between two members as pending.
    pub fn record_settlement(
        &mut self,
        group_id: &GroupId,
        draft: SettlementDraft,
    ) -> Result<SettlementId, BookError> {
        let group = self.group_ref(group_id)?;
        for member in [&draft.from, &draft.to] {
            if !group.has_member(member) {
                return Err(BookError::NotAMember {
                    member: member.clone(),
                    group: group_id.clone(),
                });
            }
        }
        if draft.from == draft.to {
            return Err(BookError::InvalidPayment(format!(
                "{} cannot pay themselves",
                draft.from
            )));
        }
        let units = Money::from_decimal(draft.amount, group.currency.exponent)
            .map_err(|err| BookError::InvalidPayment(err.to_string()))?;
        if units <= Money::ZERO {
            return Err(BookError::InvalidPayment(format!(
                "amount {} must be positive",
                draft.amount
            )));
        }

        let currency = group.currency.code.clone();
        self.sequence.settlements += 1;
        let id = SettlementId::new(format!("settle-{}", self.sequence.settlements));
        let record = SettlementRecord {
            id: id.clone(),
            group_id: group_id.clone(),
            from: draft.from,
            to: draft.to,
            amount: draft.amount,
            currency,
            description: draft.description,
            date: draft.date.unwrap_or_else(|| Utc::now().date_naive()),
            status: SettlementStatus::Pending,
            payment_method: draft.payment_method,
        };
        info!(
            group = %group_id,
            settlement = %id,
            from = %record.from,
            to = %record.to,
            amount = %record.amount,
            "settlement recorded"
        );
        self.settlements.push(record);
        Ok(id)
    }

    pub fn complete_settlement(
        &mut self,
        id: &SettlementId,
    ) -> Result<&SettlementRecord, BookError> {
        self.transition(id, SettlementStatus::Completed)
    }

    pub fn cancel_settlement(&mut self, id: &SettlementId) -> Result<&SettlementRecord, BookError> {
        self.transition(id, SettlementStatus::Cancelled)
    }

    pub fn settlement_records<'a>(
        &'a self,
        group_id: &'a GroupId,
    ) -> impl Iterator<Item = &'a SettlementRecord> + 'a {
        self.settlements
            .iter()
            .filter(move |record| record.group_id == *group_id)
    }

    pub fn to_json(&self) -> Result<String, BookError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Loads a snapshot, refusing one whose currencies are unsupported or
    /// whose stored shares no longer follow from their expense's split.
    pub fn from_json(raw: &str) -> Result<Self, BookError> {
        let book: Self = serde_json::from_str(raw)?;
        book.check_consistency()?;
        Ok(book)
    }

    fn check_consistency(&self) -> Result<(), BookError> {
        self.config.validate()?;
        for group in self.groups.values() {
            validate_currency(&group.currency)?;
        }
        for expense in &self.expenses {
            let group = self.group_ref(&expense.group_id)?;
            let calculator = self.config.calculator_for(&group.currency);
            let shares = calculator.compute(expense.amount, &expense.split, &expense.participants)?;
            if shares != expense.shares {
                return Err(BookError::InconsistentSnapshot(format!(
                    "stored shares of {} do not match its split",
                    expense.id
                )));
            }
        }
        for record in &self.settlements {
            self.group_ref(&record.group_id)?;
        }
        Ok(())
    }

    fn group_ref(&self, id: &GroupId) -> Result<&Group, BookError> {
        self.groups
            .get(id)
            .ok_or_else(|| BookError::GroupNotFound(id.clone()))
    }

    fn completed_payments(&self, group_id: &GroupId) -> Vec<Settlement> {
        self.settlement_records(group_id)
            .filter(|record| record.status == SettlementStatus::Completed)
            .map(SettlementRecord::as_settlement)
            .collect()
    }

    fn transition(
        &mut self,
        id: &SettlementId,
        status: SettlementStatus,
    ) -> Result<&SettlementRecord, BookError> {
        let record = self
            .settlements
            .iter_mut()
            .find(|record| record.id == *id)
            .ok_or_else(|| BookError::SettlementNotFound(id.clone()))?;
        if record.status != SettlementStatus::Pending {
            return Err(BookError::InvalidTransition {
                id: id.clone(),
                status: record.status,
            });
        }
        record.status = status;
        info!(settlement = %id, ?status, "settlement status changed");
        Ok(record)
    }
}

fn check_expense_members(group: &Group, draft: &ExpenseDraft) -> Result<(), BookError> {
    let outsider = std::iter::once(&draft.payer)
        .chain(draft.participants.iter())
        .find(|member| !group.has_member(member));
    match outsider {
        Some(member) => Err(BookError::NotAMember {
            member: member.clone(),
            group: group.id.clone(),
        }),
        None => Ok(()),
    }
}
