//! Due-rule processing -- one tick of the recurring payment scheduler.
//!
//! Each due rule is settled in a single guarded [`WriteBatch`]: deduction
//! consumption, the payment transaction (if any) and the schedule advance
//! commit together or not at all. The batch is guarded on the rule's current
//! `next_run_at`, so overlapping ticks cannot pay the same period twice; the
//! loser sees a conflict and counts the rule as superseded.
//!
//! A conflict on anything else (a deduction another writer just consumed or
//! a skip request that arrived mid-tick) leaves the rule due at the same
//! instant. Such a rule is re-read and re-planned, up to
//! [`MAX_SETTLE_ATTEMPTS`] times, and counted as `contended` if it still
//! cannot be settled; the next tick picks it up again.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::deduction::{plan_consumption, total_pending};
use crate::error::{LedgerError, Result};
use crate::model::{DeductionId, NewTransaction, RecurringRule, TransactionId};
use crate::money::Amount;
use crate::notify::{self, Notifier};
use crate::schedule;
use crate::store::{Guard, LedgerStore, WriteBatch, WriteOp};

/// Settlement attempts per rule and tick before it is reported as contended.
pub const MAX_SETTLE_ATTEMPTS: usize = 3;

/// Counts for one processor run.
///
/// `processed` includes the `reduced` payments. `skipped` covers both payments
/// fully absorbed by deductions and payments waived through `skip_next`.
/// Every settled rule counts once, however many periods it was behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub total: usize,
    pub processed: usize,
    pub reduced: usize,
    pub skipped: usize,
    /// Another run settled or rescheduled the rule first.
    pub superseded: usize,
    /// Still due at the same instant after every attempt conflicted.
    #[serde(default)]
    pub contended: usize,
    pub failed: usize,
}

/// What happened to one due rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RuleOutcome {
    Paid {
        transaction_id: TransactionId,
        amount: Amount,
        next_run_at: DateTime<Utc>,
    },
    Reduced {
        transaction_id: TransactionId,
        amount: Amount,
        deducted: Amount,
        next_run_at: DateTime<Utc>,
    },
    Skipped {
        deducted: Amount,
        deductions_consumed: Vec<DeductionId>,
        next_run_at: DateTime<Utc>,
    },
    /// Waived through `skip_next`; deductions are left for the next payment.
    Waived { next_run_at: DateTime<Utc> },
}

/// Result of settling one rule, conflicts included.
enum Settlement {
    Settled(RuleOutcome),
    Superseded,
}

pub struct DueRuleProcessor<S: ?Sized, N: ?Sized, C> {
    store: Arc<S>,
    notifier: Arc<N>,
    clock: C,
}

impl<S, N, C> DueRuleProcessor<S, N, C>
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

    /// Settle every active rule whose `next_run_at` is at or before now.
    ///
    /// A rule that is several periods behind is settled once: it pays a single
    /// period and its next run moves to the first slot after now. Missed
    /// periods are not back-paid.
    ///
    /// Per-rule failures are logged and counted; they never stop the batch.
    ///
    /// # Errors
    /// Only when the due rules cannot be listed at all.
    pub fn run(&self) -> Result<ProcessReport> {
        let now = self.clock.now();
        let rules = self.store.due_rules(now)?;
        let mut report = ProcessReport {
            total: rules.len(),
            ..ProcessReport::default()
        };

        for rule in &rules {
            match self.settle(rule, now) {
                Ok(Settlement::Settled(RuleOutcome::Paid { .. })) => report.processed += 1,
                Ok(Settlement::Settled(RuleOutcome::Reduced { .. })) => {
                    report.processed += 1;
                    report.reduced += 1;
                }
                Ok(Settlement::Settled(
                    RuleOutcome::Skipped { .. } | RuleOutcome::Waived { .. },
                )) => report.skipped += 1,
                Ok(Settlement::Superseded) => {
                    debug!(rule_id = %rule.id, "rule already settled by another run");
                    report.superseded += 1;
                }
                Err(err) if err.is_conflict() => {
                    warn!(rule_id = %rule.id, error = %err, "rule kept conflicting; left due for the next run");
                    report.contended += 1;
                }
                Err(err) => {
                    warn!(rule_id = %rule.id, child_id = %rule.child_id, error = %err, "recurring payment failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            total = report.total,
            processed = report.processed,
            reduced = report.reduced,
            skipped = report.skipped,
            superseded = report.superseded,
            contended = report.contended,
            failed = report.failed,
            "recurring payments run complete"
        );
        Ok(report)
    }

    /// Settle `rule`, re-reading and re-planning it while conflicts leave it
    /// due at the same instant.
    fn settle(&self, rule: &RecurringRule, now: DateTime<Utc>) -> Result<Settlement> {
        let mut current = rule.clone();
        let mut attempt = 1;
        loop {
            let err = match self.process_rule(&current, now) {
                Ok(outcome) => return Ok(Settlement::Settled(outcome)),
                Err(err) if err.is_conflict() => err,
                Err(err) => return Err(err),
            };
            let fresh = match self.store.rule(current.id)? {
                Some(fresh) if fresh.is_due(now) && fresh.next_run_at == current.next_run_at => {
                    fresh
                }
                _ => return Ok(Settlement::Superseded),
            };
            if attempt >= MAX_SETTLE_ATTEMPTS {
                return Err(err);
            }
            debug!(rule_id = %current.id, attempt, error = %err, "state changed underneath; replanning");
            attempt += 1;
            current = fresh;
        }
    }

    fn process_rule(&self, rule: &RecurringRule, now: DateTime<Utc>) -> Result<RuleOutcome> {
        if rule.skip_next {
            return self.waive(rule, now);
        }
        if !rule.amount.is_positive() {
            return Err(LedgerError::Validation(format!(
                "rule {} has non-positive amount {}",
                rule.id, rule.amount
            )));
        }

        let pending = self.store.pending_deductions(rule.child_id)?;
        let total_deductions = total_pending(&pending);
        let plan = plan_consumption(&pending, rule.amount);
        let next_run_at = schedule::advance_past(&rule.schedule, rule.next_run_at, now);
        let payout = rule.amount - plan.amount_deducted;

        let mut batch = WriteBatch::new();
        batch
            .guard(Guard::RuleScheduledAt {
                rule_id: rule.id,
                next_run_at: rule.next_run_at,
            })
            .guard(Guard::RuleSkipNext {
                rule_id: rule.id,
                skip_next: false,
            });
        plan.write_into(&mut batch);

        let transaction = if payout.is_positive() {
            let description = if plan.amount_deducted.is_positive() {
                Some(reduced_description(rule, plan.amount_deducted))
            } else {
                rule.description.clone()
            };
            let tx = NewTransaction::recurring(rule, payout, description, now);
            batch.push(WriteOp::AppendTransaction(tx.clone()));
            Some(tx)
        } else {
            None
        };

        batch.push(WriteOp::SetNextRun {
            rule_id: rule.id,
            next_run_at,
        });
        self.store.commit(batch)?;

        debug!(
            rule_id = %rule.id,
            total_deductions = %total_deductions,
            deducted = %plan.amount_deducted,
            payout = %payout,
            next_run_at = %next_run_at,
            "rule settled"
        );

        let outcome = match transaction {
            None => RuleOutcome::Skipped {
                deducted: plan.amount_deducted,
                deductions_consumed: plan.deductions_consumed.clone(),
                next_run_at,
            },
            Some(tx) if plan.amount_deducted.is_positive() => RuleOutcome::Reduced {
                transaction_id: tx.id,
                amount: tx.amount,
                deducted: plan.amount_deducted,
                next_run_at,
            },
            Some(tx) => RuleOutcome::Paid {
                transaction_id: tx.id,
                amount: tx.amount,
                next_run_at,
            },
        };
        self.announce(rule, &outcome);
        Ok(outcome)
    }

    /// Clear `skip_next` and move to the next slot without paying.
    fn waive(&self, rule: &RecurringRule, now: DateTime<Utc>) -> Result<RuleOutcome> {
        let next_run_at = schedule::advance_past(&rule.schedule, rule.next_run_at, now);
        let mut batch = WriteBatch::new();
        batch
            .guard(Guard::RuleScheduledAt {
                rule_id: rule.id,
                next_run_at: rule.next_run_at,
            })
            .guard(Guard::RuleSkipNext {
                rule_id: rule.id,
                skip_next: true,
            })
            .push(WriteOp::SetSkipNext {
                rule_id: rule.id,
                skip_next: false,
            })
            .push(WriteOp::SetNextRun {
                rule_id: rule.id,
                next_run_at,
            });
        self.store.commit(batch)?;

        info!(rule_id = %rule.id, next_run_at = %next_run_at, "payment skipped on request");
        let outcome = RuleOutcome::Waived { next_run_at };
        self.announce(rule, &outcome);
        Ok(outcome)
    }

    /// Best-effort event for a committed rule. Nothing here can fail the rule.
    fn announce(&self, rule: &RecurringRule, outcome: &RuleOutcome) {
        let child_name = match self.store.child(rule.child_id) {
            Ok(Some(child)) => Some(child.name),
            _ => None,
        };
        let new_balance = self.store.balance(rule.child_id).ok();

        let (event, payload) = match outcome {
            RuleOutcome::Skipped {
                deducted,
                deductions_consumed,
                next_run_at,
            } => (
                notify::RECURRING_PAYMENT_SKIPPED,
                json!({
                    "child_id": rule.child_id,
                    "child_name": child_name,
                    "rule_id": rule.id,
                    "reason": "deductions",
                    "amount": rule.amount,
                    "deducted": deducted,
                    "deductions_consumed": deductions_consumed,
                    "description": rule.description,
                    "new_balance": new_balance,
                    "next_payment_at": next_run_at.timestamp(),
                }),
            ),
            RuleOutcome::Waived { next_run_at } => (
                notify::RECURRING_PAYMENT_SKIPPED,
                json!({
                    "child_id": rule.child_id,
                    "child_name": child_name,
                    "rule_id": rule.id,
                    "reason": "skip_next",
                    "amount": rule.amount,
                    "deducted": Amount::ZERO,
                    "description": rule.description,
                    "new_balance": new_balance,
                    "next_payment_at": next_run_at.timestamp(),
                }),
            ),
            RuleOutcome::Reduced {
                transaction_id,
                amount,
                deducted,
                next_run_at,
            } => (
                notify::RECURRING_PAYMENT_PROCESSED,
                json!({
                    "transaction_id": transaction_id,
                    "child_id": rule.child_id,
                    "child_name": child_name,
                    "rule_id": rule.id,
                    "amount": amount,
                    "original_amount": rule.amount,
                    "deducted": deducted,
                    "reduced": true,
                    "description": rule.description,
                    "new_balance": new_balance,
                    "next_payment_at": next_run_at.timestamp(),
                }),
            ),
            RuleOutcome::Paid {
                transaction_id,
                amount,
                next_run_at,
            } => (
                notify::RECURRING_PAYMENT_PROCESSED,
                json!({
                    "transaction_id": transaction_id,
                    "child_id": rule.child_id,
                    "child_name": child_name,
                    "rule_id": rule.id,
                    "amount": amount,
                    "reduced": false,
                    "description": rule.description,
                    "new_balance": new_balance,
                    "next_payment_at": next_run_at.timestamp(),
                }),
            ),
        };
        notify::emit(self.notifier.as_ref(), event, payload);
    }
}

fn reduced_description(rule: &RecurringRule, deducted: Amount) -> String {
    let base = rule.description.as_deref().unwrap_or("Recurring payment");
    format!("{} (reduced by {} for advance payments)", base, deducted)
}
