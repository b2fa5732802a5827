//! In-memory [`LedgerStore`], serializable to a JSON snapshot.
//!
//! A single mutex guards the whole state, so every [`WriteBatch`] is applied
//! atomically with respect to every other reader and writer. Batches are
//! staged on a copy and swapped in only once every guard and operation has
//! succeeded.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::model::{
    Child, ChildId, Deduction, RecurringRule, RuleId, SavingTarget, SavingTargetId, Transaction,
};
use crate::money::Amount;
use crate::store::{CommitReceipt, Guard, LedgerStore, WriteBatch, WriteOp};

/// Plain-data view of a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    #[serde(default)]
    pub children: Vec<Child>,
    #[serde(default)]
    pub rules: Vec<RecurringRule>,
    #[serde(default)]
    pub deductions: Vec<Deduction>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub saving_targets: Vec<SavingTarget>,
    #[serde(default)]
    pub next_seq: u64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemorySnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: MemorySnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        self.state.lock().clone()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: MemorySnapshot = serde_json::from_str(json)
            .map_err(|e| LedgerError::Storage(format!("corrupt snapshot: {}", e)))?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| LedgerError::Storage(format!("cannot serialize snapshot: {}", e)))
    }
}

fn check_guard(state: &MemorySnapshot, guard: &Guard) -> Result<()> {
    match guard {
        Guard::RuleScheduledAt {
            rule_id,
            next_run_at,
        } => {
            let rule = state.rules.iter().find(|r| r.id == *rule_id);
            match rule {
                Some(r) if r.active && r.next_run_at == *next_run_at => Ok(()),
                Some(_) => Err(LedgerError::Conflict(format!(
                    "rule {} is no longer scheduled at {}",
                    rule_id, next_run_at
                ))),
                None => Err(LedgerError::Conflict(format!("rule {} was deleted", rule_id))),
            }
        }
        Guard::RuleSkipNext { rule_id, skip_next } => {
            match state.rules.iter().find(|r| r.id == *rule_id) {
                Some(r) if r.skip_next == *skip_next => Ok(()),
                Some(_) => Err(LedgerError::Conflict(format!(
                    "rule {} skip flag changed",
                    rule_id
                ))),
                None => Err(LedgerError::Conflict(format!("rule {} was deleted", rule_id))),
            }
        }
        Guard::DeductionAmount {
            deduction_id,
            amount,
        } => {
            let deduction = state.deductions.iter().find(|d| d.id == *deduction_id);
            match deduction {
                Some(d) if d.amount == *amount => Ok(()),
                Some(d) => Err(LedgerError::Conflict(format!(
                    "deduction {} changed from {} to {}",
                    deduction_id, amount, d.amount
                ))),
                None => Err(LedgerError::Conflict(format!(
                    "deduction {} was already consumed",
                    deduction_id
                ))),
            }
        }
        Guard::MinimumBalance { child_id, amount } => {
            let balance = Amount::try_sum(
                state
                    .transactions
                    .iter()
                    .filter(|t| t.child_id == *child_id)
                    .map(|t| t.amount),
            )?;
            if balance >= *amount {
                Ok(())
            } else {
                Err(LedgerError::InsufficientFunds {
                    requested: amount.to_string(),
                    available: balance.to_string(),
                })
            }
        }
    }
}

fn check_entry_limit(amount: Amount) -> Result<()> {
    if amount.within_entry_limit() {
        Ok(())
    } else {
        Err(LedgerError::Validation(format!(
            "amount {} exceeds the maximum of {}",
            amount,
            Amount::MAX_ENTRY
        )))
    }
}

fn apply_op(state: &mut MemorySnapshot, op: WriteOp, receipt: &mut CommitReceipt) -> Result<()> {
    match op {
        WriteOp::AppendTransaction(new) => {
            if !state.children.iter().any(|c| c.id == new.child_id) {
                return Err(LedgerError::not_found("child", new.child_id));
            }
            check_entry_limit(new.amount)?;
            let seq = state.next_seq;
            state.next_seq += 1;
            let transaction = new.into_transaction(seq);
            receipt.transactions.push(transaction.clone());
            state.transactions.push(transaction);
        }
        WriteOp::CreateDeduction(new) => {
            if !state.children.iter().any(|c| c.id == new.child_id) {
                return Err(LedgerError::not_found("child", new.child_id));
            }
            if !new.amount.is_positive() {
                return Err(LedgerError::Validation(
                    "deduction amount must be positive".to_string(),
                ));
            }
            check_entry_limit(new.amount)?;
            let seq = state.next_seq;
            state.next_seq += 1;
            let deduction = new.into_deduction(seq);
            receipt.deductions.push(deduction.clone());
            state.deductions.push(deduction);
        }
        WriteOp::SetDeductionAmount {
            deduction_id,
            amount,
        } => {
            if !amount.is_positive() {
                return Err(LedgerError::Validation(
                    "a deduction reduced to zero must be deleted".to_string(),
                ));
            }
            let deduction = state
                .deductions
                .iter_mut()
                .find(|d| d.id == deduction_id)
                .ok_or_else(|| LedgerError::not_found("deduction", deduction_id))?;
            deduction.amount = amount;
        }
        WriteOp::DeleteDeduction(deduction_id) => {
            let before = state.deductions.len();
            state.deductions.retain(|d| d.id != deduction_id);
            if state.deductions.len() == before {
                return Err(LedgerError::not_found("deduction", deduction_id));
            }
        }
        WriteOp::SetNextRun {
            rule_id,
            next_run_at,
        } => {
            rule_mut(state, rule_id)?.next_run_at = next_run_at;
        }
        WriteOp::SetSkipNext { rule_id, skip_next } => {
            rule_mut(state, rule_id)?.skip_next = skip_next;
        }
        WriteOp::RenameChild { child_id, name } => {
            let child = state
                .children
                .iter_mut()
                .find(|c| c.id == child_id)
                .ok_or_else(|| LedgerError::not_found("child", child_id))?;
            child.name = name;
        }
        WriteOp::DeleteChild(child_id) => {
            let before = state.children.len();
            state.children.retain(|c| c.id != child_id);
            if state.children.len() == before {
                return Err(LedgerError::not_found("child", child_id));
            }
            state.rules.retain(|r| r.child_id != child_id);
            state.deductions.retain(|d| d.child_id != child_id);
            state.saving_targets.retain(|t| t.child_id != child_id);
            state.transactions.retain(|t| t.child_id != child_id);
        }
        WriteOp::CreateSavingTarget(target) => {
            if !state.children.iter().any(|c| c.id == target.child_id) {
                return Err(LedgerError::not_found("child", target.child_id));
            }
            check_target_amount(target.target_amount)?;
            if state.saving_targets.iter().any(|t| t.id == target.id) {
                return Err(LedgerError::Validation(format!(
                    "saving target {} already exists",
                    target.id
                )));
            }
            state.saving_targets.push(target);
        }
        WriteOp::UpdateSavingTarget(target) => {
            check_target_amount(target.target_amount)?;
            let slot = target_mut(state, target.id)?;
            slot.name = target.name;
            slot.target_amount = target.target_amount;
            slot.description = target.description;
            slot.link = target.link;
            slot.sort_order = target.sort_order;
        }
        WriteOp::DeleteSavingTarget(target_id) => {
            let before = state.saving_targets.len();
            state.saving_targets.retain(|t| t.id != target_id);
            if state.saving_targets.len() == before {
                return Err(LedgerError::not_found("saving target", target_id));
            }
        }
    }
    Ok(())
}

fn rule_mut(state: &mut MemorySnapshot, rule_id: RuleId) -> Result<&mut RecurringRule> {
    state
        .rules
        .iter_mut()
        .find(|r| r.id == rule_id)
        .ok_or_else(|| LedgerError::not_found("rule", rule_id))
}

fn target_mut(state: &mut MemorySnapshot, target_id: SavingTargetId) -> Result<&mut SavingTarget> {
    state
        .saving_targets
        .iter_mut()
        .find(|t| t.id == target_id)
        .ok_or_else(|| LedgerError::not_found("saving target", target_id))
}

fn check_target_amount(amount: Amount) -> Result<()> {
    if !amount.is_positive() {
        return Err(LedgerError::Validation(
            "saving target amount must be positive".to_string(),
        ));
    }
    check_entry_limit(amount)
}

impl LedgerStore for MemoryStore {
    fn insert_child(&self, child: Child) -> Result<()> {
        let mut state = self.state.lock();
        if state.children.iter().any(|c| c.id == child.id) {
            return Err(LedgerError::Validation(format!(
                "child {} already exists",
                child.id
            )));
        }
        state.children.push(child);
        Ok(())
    }

    fn child(&self, id: ChildId) -> Result<Option<Child>> {
        Ok(self.state.lock().children.iter().find(|c| c.id == id).cloned())
    }

    fn children(&self) -> Result<Vec<Child>> {
        Ok(self.state.lock().children.clone())
    }

    fn insert_rule(&self, rule: RecurringRule) -> Result<()> {
        let mut state = self.state.lock();
        if !state.children.iter().any(|c| c.id == rule.child_id) {
            return Err(LedgerError::not_found("child", rule.child_id));
        }
        state.rules.push(rule);
        Ok(())
    }

    fn update_rule(&self, rule: RecurringRule) -> Result<()> {
        let mut state = self.state.lock();
        let slot = state
            .rules
            .iter_mut()
            .find(|r| r.id == rule.id)
            .ok_or_else(|| LedgerError::not_found("rule", rule.id))?;
        *slot = rule;
        Ok(())
    }

    fn delete_rule(&self, id: RuleId) -> Result<()> {
        let mut state = self.state.lock();
        let before = state.rules.len();
        state.rules.retain(|r| r.id != id);
        if state.rules.len() == before {
            return Err(LedgerError::not_found("rule", id));
        }
        Ok(())
    }

    fn rule(&self, id: RuleId) -> Result<Option<RecurringRule>> {
        Ok(self.state.lock().rules.iter().find(|r| r.id == id).cloned())
    }

    fn rules_for_child(&self, child_id: ChildId) -> Result<Vec<RecurringRule>> {
        Ok(self
            .state
            .lock()
            .rules
            .iter()
            .filter(|r| r.child_id == child_id)
            .cloned()
            .collect())
    }

    fn due_rules(&self, now: DateTime<Utc>) -> Result<Vec<RecurringRule>> {
        Ok(self
            .state
            .lock()
            .rules
            .iter()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect())
    }

    fn pending_deductions(&self, child_id: ChildId) -> Result<Vec<Deduction>> {
        let mut pending: Vec<Deduction> = self
            .state
            .lock()
            .deductions
            .iter()
            .filter(|d| d.child_id == child_id)
            .cloned()
            .collect();
        pending.sort_by_key(|d| d.seq);
        Ok(pending)
    }

    fn transactions(&self, child_id: ChildId) -> Result<Vec<Transaction>> {
        let mut transactions: Vec<Transaction> = self
            .state
            .lock()
            .transactions
            .iter()
            .filter(|t| t.child_id == child_id)
            .cloned()
            .collect();
        transactions.sort_by_key(Transaction::order_key);
        Ok(transactions)
    }

    fn saving_target(&self, id: SavingTargetId) -> Result<Option<SavingTarget>> {
        Ok(self
            .state
            .lock()
            .saving_targets
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    fn saving_targets(&self, child_id: ChildId) -> Result<Vec<SavingTarget>> {
        let mut targets: Vec<SavingTarget> = self
            .state
            .lock()
            .saving_targets
            .iter()
            .filter(|t| t.child_id == child_id)
            .cloned()
            .collect();
        targets.sort_by_key(|t| (t.sort_order, t.created_at));
        Ok(targets)
    }

    fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        let mut state = self.state.lock();

        for guard in &batch.guards {
            check_guard(&state, guard)?;
        }

        let mut staged = state.clone();
        let mut receipt = CommitReceipt::default();
        for op in batch.ops {
            apply_op(&mut staged, op, &mut receipt)?;
        }

        *state = staged;
        Ok(receipt)
    }
}
