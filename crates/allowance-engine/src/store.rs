//! Storage contract for the ledger.
//!
//! The engine never issues a read followed by an unguarded write. Every
//! mutation that depends on what was read goes through [`LedgerStore::commit`]
//! as a [`WriteBatch`]: the batch carries [`Guard`]s describing the state it
//! was planned against, and the store applies either all of its operations or
//! none of them. A failed guard surfaces as `LedgerError::Conflict`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{
    Child, ChildId, Deduction, DeductionId, NewDeduction, NewTransaction, RecurringRule, RuleId,
    SavingTarget, SavingTargetId, Transaction,
};
use crate::money::Amount;

/// A precondition checked atomically with the rest of the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Guard {
    /// The rule must still be active and scheduled at exactly `next_run_at`.
    RuleScheduledAt {
        rule_id: RuleId,
        next_run_at: DateTime<Utc>,
    },
    /// The rule must still carry exactly this `skip_next` flag.
    RuleSkipNext { rule_id: RuleId, skip_next: bool },
    /// The deduction must still exist with exactly `amount` remaining.
    DeductionAmount {
        deduction_id: DeductionId,
        amount: Amount,
    },
    /// The child's balance must be at least `amount`.
    MinimumBalance { child_id: ChildId, amount: Amount },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteOp {
    AppendTransaction(NewTransaction),
    CreateDeduction(NewDeduction),
    /// Reduce a deduction to a new, strictly positive remaining amount.
    SetDeductionAmount {
        deduction_id: DeductionId,
        amount: Amount,
    },
    DeleteDeduction(DeductionId),
    SetNextRun {
        rule_id: RuleId,
        next_run_at: DateTime<Utc>,
    },
    /// Only touches the flag, never the schedule.
    SetSkipNext { rule_id: RuleId, skip_next: bool },
    RenameChild { child_id: ChildId, name: String },
    /// Remove a child with its rules, deductions, saving targets and transactions.
    DeleteChild(ChildId),
    CreateSavingTarget(SavingTarget),
    /// Replace a saving target's editable fields; `id`, `child_id` and `created_at` are kept.
    UpdateSavingTarget(SavingTarget),
    DeleteSavingTarget(SavingTargetId),
}

/// An all-or-nothing unit of writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub guards: Vec<Guard>,
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(&mut self, guard: Guard) -> &mut Self {
        self.guards.push(guard);
        self
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Records created by a committed batch, with their store-assigned sequence numbers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReceipt {
    pub transactions: Vec<Transaction>,
    pub deductions: Vec<Deduction>,
}

/// What the engine needs from a persistence backend.
///
/// Reads that return collections preserve ledger order: rules and deductions
/// in creation order, transactions by `(created_at, seq)`.
pub trait LedgerStore: Send + Sync {
    fn insert_child(&self, child: Child) -> Result<()>;
    fn child(&self, id: ChildId) -> Result<Option<Child>>;
    fn children(&self) -> Result<Vec<Child>>;

    fn insert_rule(&self, rule: RecurringRule) -> Result<()>;
    /// Replace a rule wholesale (user edits). `NotFound` if it does not exist.
    fn update_rule(&self, rule: RecurringRule) -> Result<()>;
    fn delete_rule(&self, id: RuleId) -> Result<()>;
    fn rule(&self, id: RuleId) -> Result<Option<RecurringRule>>;
    fn rules_for_child(&self, child_id: ChildId) -> Result<Vec<RecurringRule>>;
    /// Active rules with `next_run_at <= now`.
    fn due_rules(&self, now: DateTime<Utc>) -> Result<Vec<RecurringRule>>;

    /// Pending deductions, oldest first.
    fn pending_deductions(&self, child_id: ChildId) -> Result<Vec<Deduction>>;
    fn transactions(&self, child_id: ChildId) -> Result<Vec<Transaction>>;

    fn saving_target(&self, id: SavingTargetId) -> Result<Option<SavingTarget>>;
    /// A child's saving targets by `sort_order`, then creation time.
    fn saving_targets(&self, child_id: ChildId) -> Result<Vec<SavingTarget>>;

    fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt>;

    fn balance(&self, child_id: ChildId) -> Result<Amount> {
        Amount::try_sum(self.transactions(child_id)?.iter().map(|t| t.amount))
    }
}
