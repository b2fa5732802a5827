//! Manual ledger actions and rule management.
//!
//! [`AllowanceService`] is what a UI or CLI talks to: deposits, withdrawals,
//! advance payments, rule and saving-target CRUD, child edits and the
//! read-only balance views. Every write
//! validates its input before touching the store and goes through a single
//! [`WriteBatch`].

use std::sync::Arc;

use chrono_tz::Tz;
use serde_json::json;
use tracing::info;

use crate::balance::{self, BalanceEvent, DailyBalance};
use crate::clock::Clock;
use crate::deduction::{self, ConsumptionResult};
use crate::error::{LedgerError, Result};
use crate::model::{
    generate_id, Child, ChildId, Deduction, FamilyId, NewDeduction, NewTransaction, RecurringRule,
    RuleId, SavingTarget, SavingTargetId, Transaction, UserId,
};
use crate::money::Amount;
use crate::notify::{self, Notifier};
use crate::processor::DueRuleProcessor;
use crate::savings::{self, SavingTargetDraft, SavingTargetProgress};
use crate::schedule::{calculate_next_run, Schedule};
use crate::store::{Guard, LedgerStore, WriteBatch, WriteOp};

/// User-supplied fields of a recurring rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDraft {
    pub amount: Amount,
    pub description: Option<String>,
    pub schedule: Schedule,
}

impl RuleDraft {
    fn validate(&self) -> Result<()> {
        require_positive(self.amount)?;
        self.schedule.interval.validate()?;
        if self.schedule.hour > 23 {
            return Err(LedgerError::Validation(format!(
                "hour must be 0-23, got {}",
                self.schedule.hour
            )));
        }
        Ok(())
    }
}

pub struct AllowanceService<S: ?Sized, N: ?Sized, C> {
    store: Arc<S>,
    notifier: Arc<N>,
    clock: C,
}

fn require_positive(amount: Amount) -> Result<()> {
    if !amount.is_positive() {
        return Err(LedgerError::Validation(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    if !amount.within_entry_limit() {
        return Err(LedgerError::Validation(format!(
            "amount {} exceeds the maximum of {}",
            amount,
            Amount::MAX_ENTRY
        )));
    }
    Ok(())
}

/// Trim free text; blank input becomes `None`.
pub(crate) fn clean(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

impl<S, N, C> AllowanceService<S, N, C>
where
    S: LedgerStore + ?Sized,
    N: Notifier + ?Sized,
    C: Clock,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, clock: C) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// A due-rule processor sharing this service's store, notifier and clock.
    pub fn processor(&self) -> DueRuleProcessor<S, N, C>
    where
        C: Clone,
    {
        DueRuleProcessor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.notifier),
            self.clock.clone(),
        )
    }

    fn require_child(&self, child_id: ChildId) -> Result<Child> {
        self.store
            .child(child_id)?
            .ok_or_else(|| LedgerError::not_found("child", child_id))
    }

    fn require_rule(&self, rule_id: RuleId) -> Result<RecurringRule> {
        self.store
            .rule(rule_id)?
            .ok_or_else(|| LedgerError::not_found("rule", rule_id))
    }

    pub fn add_child(&self, name: &str, family_id: Option<FamilyId>) -> Result<Child> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::Validation("name is required".to_string()));
        }
        let child = Child {
            id: generate_id(),
            name: name.to_string(),
            family_id,
            created_at: self.clock.now(),
        };
        self.store.insert_child(child.clone())?;
        Ok(child)
    }

    pub fn children(&self) -> Result<Vec<Child>> {
        self.store.children()
    }

    pub fn rename_child(&self, child_id: ChildId, name: &str) -> Result<Child> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::Validation("name is required".to_string()));
        }
        let mut child = self.require_child(child_id)?;

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::RenameChild {
            child_id,
            name: name.to_string(),
        });
        self.store.commit(batch)?;
        child.name = name.to_string();

        notify::emit(
            self.notifier.as_ref(),
            notify::CHILD_UPDATED,
            json!({
                "child_id": child.id,
                "family_id": child.family_id,
                "name": child.name,
            }),
        );
        Ok(child)
    }

    /// Remove a child together with everything recorded for them.
    pub fn delete_child(&self, child_id: ChildId) -> Result<Child> {
        let child = self.require_child(child_id)?;

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::DeleteChild(child_id));
        self.store.commit(batch)?;
        info!(child_id = %child_id, "child deleted");

        notify::emit(
            self.notifier.as_ref(),
            notify::CHILD_DELETED,
            json!({
                "child_id": child.id,
                "family_id": child.family_id,
                "name": child.name,
            }),
        );
        Ok(child)
    }

    // -- money movements ----------------------------------------------------

    pub fn deposit(
        &self,
        child_id: ChildId,
        amount: Amount,
        description: Option<String>,
        user_id: Option<UserId>,
    ) -> Result<Transaction> {
        require_positive(amount)?;
        let child = self.require_child(child_id)?;

        let tx = NewTransaction::manual(child_id, amount, clean(description), user_id, self.clock.now());
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::AppendTransaction(tx));
        let transaction = self.commit_single_transaction(batch)?;

        self.announce_transaction(&child, &transaction, "deposit");
        Ok(transaction)
    }

    /// Take money out. Fails with `InsufficientFunds` if the balance is lower than `amount`.
    pub fn withdraw(
        &self,
        child_id: ChildId,
        amount: Amount,
        description: Option<String>,
        user_id: Option<UserId>,
    ) -> Result<Transaction> {
        require_positive(amount)?;
        let child = self.require_child(child_id)?;

        let tx = NewTransaction::manual(child_id, -amount, clean(description), user_id, self.clock.now());
        let mut batch = WriteBatch::new();
        batch
            .guard(Guard::MinimumBalance { child_id, amount })
            .push(WriteOp::AppendTransaction(tx));
        let transaction = self.commit_single_transaction(batch)?;

        self.announce_transaction(&child, &transaction, "withdrawal");
        Ok(transaction)
    }

    /// Pay out `amount` now and record it as a deduction against future recurring payments.
    ///
    /// The transaction and the deduction are written atomically.
    pub fn advance_payment(
        &self,
        child_id: ChildId,
        amount: Amount,
        description: Option<String>,
        user_id: Option<UserId>,
    ) -> Result<(Transaction, Deduction)> {
        require_positive(amount)?;
        let child = self.require_child(child_id)?;
        let now = self.clock.now();
        let description = clean(description).or_else(|| Some("Advance payment".to_string()));

        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::AppendTransaction(NewTransaction::manual(
                child_id,
                amount,
                description.clone(),
                user_id,
                now,
            )))
            .push(WriteOp::CreateDeduction(NewDeduction::new(
                child_id,
                amount,
                description,
                now,
            )));
        let receipt = self.store.commit(batch)?;

        let (Some(transaction), Some(deduction)) = (
            receipt.transactions.into_iter().next(),
            receipt.deductions.into_iter().next(),
        ) else {
            return Err(LedgerError::Storage(
                "commit receipt is missing the advance payment records".to_string(),
            ));
        };

        info!(child_id = %child_id, amount = %amount, "advance payment recorded");
        self.announce_transaction(&child, &transaction, "advance");
        self.announce_deduction(&child, &deduction);
        Ok((transaction, deduction))
    }

    /// Record a debt to be taken out of future recurring payments, with no payout now.
    pub fn add_deduction(
        &self,
        child_id: ChildId,
        amount: Amount,
        description: Option<String>,
    ) -> Result<Deduction> {
        require_positive(amount)?;
        let child = self.require_child(child_id)?;

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::CreateDeduction(NewDeduction::new(
            child_id,
            amount,
            clean(description),
            self.clock.now(),
        )));
        let deduction = self
            .store
            .commit(batch)?
            .deductions
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::Storage("commit receipt is missing the deduction".to_string()))?;

        self.announce_deduction(&child, &deduction);
        Ok(deduction)
    }

    pub fn consume_deductions(&self, child_id: ChildId, payment: Amount) -> Result<ConsumptionResult> {
        deduction::consume_deductions(self.store.as_ref(), child_id, payment)
    }

    pub fn pending_deductions(&self, child_id: ChildId) -> Result<Vec<Deduction>> {
        self.require_child(child_id)?;
        self.store.pending_deductions(child_id)
    }

    fn commit_single_transaction(&self, batch: WriteBatch) -> Result<Transaction> {
        self.store
            .commit(batch)?
            .transactions
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::Storage("commit receipt is missing the transaction".to_string()))
    }

    // -- recurring rules ----------------------------------------------------

    pub fn create_rule(&self, child_id: ChildId, draft: RuleDraft) -> Result<RecurringRule> {
        draft.validate()?;
        self.require_child(child_id)?;
        let now = self.clock.now();

        let rule = RecurringRule {
            id: generate_id(),
            child_id,
            amount: draft.amount,
            description: clean(draft.description),
            next_run_at: calculate_next_run(&draft.schedule, now),
            schedule: draft.schedule,
            skip_next: false,
            active: true,
            created_at: now,
        };
        self.store.insert_rule(rule.clone())?;
        info!(rule_id = %rule.id, child_id = %child_id, next_run_at = %rule.next_run_at, "rule created");
        Ok(rule)
    }

    /// Replace a rule's amount, description and schedule; the next run is recomputed from now.
    pub fn edit_rule(&self, rule_id: RuleId, draft: RuleDraft) -> Result<RecurringRule> {
        draft.validate()?;
        let mut rule = self.require_rule(rule_id)?;

        rule.amount = draft.amount;
        rule.description = clean(draft.description);
        rule.schedule = draft.schedule;
        rule.next_run_at = calculate_next_run(&rule.schedule, self.clock.now());
        self.store.update_rule(rule.clone())?;
        Ok(rule)
    }

    /// Pause or resume a rule. Resuming never pays out the periods missed while paused.
    pub fn set_rule_active(&self, rule_id: RuleId, active: bool) -> Result<RecurringRule> {
        let mut rule = self.require_rule(rule_id)?;
        let now = self.clock.now();

        rule.active = active;
        if active && rule.next_run_at <= now {
            rule.next_run_at = calculate_next_run(&rule.schedule, now);
        }
        self.store.update_rule(rule.clone())?;
        Ok(rule)
    }

    /// Waive (or stop waiving) the rule's next due payment. The schedule is untouched.
    pub fn set_skip_next(&self, rule_id: RuleId, skip_next: bool) -> Result<RecurringRule> {
        self.require_rule(rule_id)?;
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::SetSkipNext { rule_id, skip_next });
        self.store.commit(batch)?;
        self.require_rule(rule_id)
    }

    pub fn delete_rule(&self, rule_id: RuleId) -> Result<()> {
        self.store.delete_rule(rule_id)
    }

    pub fn rules_for_child(&self, child_id: ChildId) -> Result<Vec<RecurringRule>> {
        self.require_child(child_id)?;
        self.store.rules_for_child(child_id)
    }

    // -- saving targets -----------------------------------------------------

    pub fn add_saving_target(
        &self,
        child_id: ChildId,
        draft: SavingTargetDraft,
    ) -> Result<SavingTarget> {
        let draft = draft.validated()?;
        self.require_child(child_id)?;
        let existing = self.store.saving_targets(child_id)?;
        let sort_order = existing
            .iter()
            .map(|t| t.sort_order.saturating_add(1))
            .max()
            .unwrap_or(0);

        let target = SavingTarget {
            id: generate_id(),
            child_id,
            name: draft.name,
            target_amount: draft.target_amount,
            description: draft.description,
            link: draft.link,
            sort_order,
            created_at: self.clock.now(),
        };
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::CreateSavingTarget(target.clone()));
        self.store.commit(batch)?;
        Ok(target)
    }

    /// Replace a target's name, amount, description and link; its position is kept.
    pub fn edit_saving_target(
        &self,
        target_id: SavingTargetId,
        draft: SavingTargetDraft,
    ) -> Result<SavingTarget> {
        let draft = draft.validated()?;
        let mut target = self.require_saving_target(target_id)?;
        target.name = draft.name;
        target.target_amount = draft.target_amount;
        target.description = draft.description;
        target.link = draft.link;

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::UpdateSavingTarget(target.clone()));
        self.store.commit(batch)?;
        Ok(target)
    }

    pub fn delete_saving_target(&self, target_id: SavingTargetId) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::DeleteSavingTarget(target_id));
        self.store.commit(batch)?;
        Ok(())
    }

    /// A child's targets in display order, each with progress against the current balance.
    pub fn saving_targets(&self, child_id: ChildId) -> Result<Vec<SavingTargetProgress>> {
        self.require_child(child_id)?;
        let balance = self.store.balance(child_id)?;
        Ok(self
            .store
            .saving_targets(child_id)?
            .into_iter()
            .map(|target| savings::progress(target, balance))
            .collect())
    }

    fn require_saving_target(&self, target_id: SavingTargetId) -> Result<SavingTarget> {
        self.store
            .saving_target(target_id)?
            .ok_or_else(|| LedgerError::not_found("saving target", target_id))
    }

    // -- read views ---------------------------------------------------------

    pub fn balance(&self, child_id: ChildId) -> Result<Amount> {
        self.require_child(child_id)?;
        self.store.balance(child_id)
    }

    pub fn history(&self, child_id: ChildId, window_days: u32, tz: Tz) -> Result<Vec<DailyBalance>> {
        self.require_child(child_id)?;
        let transactions = self.store.transactions(child_id)?;
        Ok(balance::balance_history(&transactions, window_days, self.clock.now(), tz))
    }

    pub fn events(&self, child_id: ChildId, window_days: u32) -> Result<Vec<BalanceEvent>> {
        self.require_child(child_id)?;
        let transactions = self.store.transactions(child_id)?;
        Ok(balance::balance_events(&transactions, window_days, self.clock.now()))
    }

    pub fn events_by_count(&self, child_id: ChildId, count: usize) -> Result<Vec<BalanceEvent>> {
        self.require_child(child_id)?;
        let transactions = self.store.transactions(child_id)?;
        Ok(balance::balance_events_by_count(&transactions, count))
    }

    pub fn recent_transactions(&self, child_id: ChildId, limit: usize) -> Result<Vec<Transaction>> {
        self.require_child(child_id)?;
        let transactions = self.store.transactions(child_id)?;
        Ok(balance::recent_transactions(&transactions, limit))
    }

    // -- events -------------------------------------------------------------

    fn announce_transaction(&self, child: &Child, transaction: &Transaction, kind: &str) {
        let new_balance = self.store.balance(child.id).ok();
        notify::emit(
            self.notifier.as_ref(),
            notify::TRANSACTION_CREATED,
            json!({
                "transaction_id": transaction.id,
                "child_id": child.id,
                "child_name": child.name,
                "family_id": child.family_id,
                "amount": transaction.amount,
                "description": transaction.description,
                "type": kind,
                "new_balance": new_balance,
                "user_id": transaction.user_id,
            }),
        );
    }

    fn announce_deduction(&self, child: &Child, deduction: &Deduction) {
        notify::emit(
            self.notifier.as_ref(),
            notify::DEDUCTION_CREATED,
            json!({
                "deduction_id": deduction.id,
                "child_id": child.id,
                "child_name": child.name,
                "family_id": child.family_id,
                "amount": deduction.amount,
                "description": deduction.description,
            }),
        );
    }
}
