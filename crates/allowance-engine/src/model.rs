//! Ledger records: children, recurring rules, deductions, transactions,
//! saving targets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::Amount;
use crate::schedule::Schedule;

pub type ChildId = Uuid;
pub type FamilyId = Uuid;
pub type RuleId = Uuid;
pub type DeductionId = Uuid;
pub type TransactionId = Uuid;
pub type UserId = Uuid;
pub type SavingTargetId = Uuid;

pub fn generate_id() -> Uuid {
    Uuid::new_v4()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Child {
    pub id: ChildId,
    pub name: String,
    pub family_id: Option<FamilyId>,
    pub created_at: DateTime<Utc>,
}

/// A scheduled payment to a child. The processor only ever changes
/// `next_run_at` and clears `skip_next`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringRule {
    pub id: RuleId,
    pub child_id: ChildId,
    pub amount: Amount,
    pub description: Option<String>,
    pub schedule: Schedule,
    pub next_run_at: DateTime<Utc>,
    /// Waive the next due payment without paying or consuming deductions.
    #[serde(default)]
    pub skip_next: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl RecurringRule {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.next_run_at <= now
    }
}

/// Outstanding debt offset against future recurring payments, consumed FIFO.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deduction {
    pub id: DeductionId,
    pub child_id: ChildId,
    /// Remaining amount; never negative. A deduction at zero is deleted.
    pub amount: Amount,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Store-assigned creation order.
    pub seq: u64,
}

/// Something a child is saving up for. Progress is measured against the
/// child's current balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingTarget {
    pub id: SavingTargetId,
    pub child_id: ChildId,
    pub name: String,
    pub target_amount: Amount,
    pub description: Option<String>,
    pub link: Option<String>,
    /// Display position within the child's targets; new targets go last.
    pub sort_order: u32,
    pub created_at: DateTime<Utc>,
}

/// An entry in the append-only ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub child_id: ChildId,
    pub user_id: Option<UserId>,
    pub amount: Amount,
    pub description: Option<String>,
    pub is_recurring: bool,
    pub recurring_rule_id: Option<RuleId>,
    pub created_at: DateTime<Utc>,
    /// Store-assigned insertion sequence; breaks `created_at` ties.
    pub seq: u64,
}

impl Transaction {
    /// Total ledger order: timestamp first, insertion sequence second.
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.created_at, self.seq)
    }
}

/// A transaction about to be appended; the store assigns `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub id: TransactionId,
    pub child_id: ChildId,
    pub user_id: Option<UserId>,
    pub amount: Amount,
    pub description: Option<String>,
    pub is_recurring: bool,
    pub recurring_rule_id: Option<RuleId>,
    pub created_at: DateTime<Utc>,
}

impl NewTransaction {
    pub fn manual(
        child_id: ChildId,
        amount: Amount,
        description: Option<String>,
        user_id: Option<UserId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: generate_id(),
            child_id,
            user_id,
            amount,
            description,
            is_recurring: false,
            recurring_rule_id: None,
            created_at,
        }
    }

    pub fn recurring(
        rule: &RecurringRule,
        amount: Amount,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: generate_id(),
            child_id: rule.child_id,
            user_id: None,
            amount,
            description,
            is_recurring: true,
            recurring_rule_id: Some(rule.id),
            created_at,
        }
    }

    pub(crate) fn into_transaction(self, seq: u64) -> Transaction {
        Transaction {
            id: self.id,
            child_id: self.child_id,
            user_id: self.user_id,
            amount: self.amount,
            description: self.description,
            is_recurring: self.is_recurring,
            recurring_rule_id: self.recurring_rule_id,
            created_at: self.created_at,
            seq,
        }
    }
}

/// A deduction about to be created; the store assigns `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDeduction {
    pub id: DeductionId,
    pub child_id: ChildId,
    pub amount: Amount,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewDeduction {
    pub fn new(
        child_id: ChildId,
        amount: Amount,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: generate_id(),
            child_id,
            amount,
            description,
            created_at,
        }
    }

    pub(crate) fn into_deduction(self, seq: u64) -> Deduction {
        Deduction {
            id: self.id,
            child_id: self.child_id,
            amount: self.amount,
            description: self.description,
            created_at: self.created_at,
            seq,
        }
    }
}
