//! FIFO consumption of pending deductions against a payment.
//!
//! Planning is pure ([`plan_consumption`]); committing goes through a guarded
//! [`WriteBatch`] so that two concurrent consumers for the same child cannot
//! both spend the same deduction.

use serde::Serialize;
use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::model::{ChildId, Deduction, DeductionId};
use crate::money::Amount;
use crate::store::{Guard, LedgerStore, WriteBatch, WriteOp};

/// A deduction that was only partly used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartialConsumption {
    pub deduction_id: DeductionId,
    pub previous_amount: Amount,
    pub remaining_amount: Amount,
}

/// The outcome of walking the deduction queue, before anything is written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumptionPlan {
    pub amount_deducted: Amount,
    /// Fully consumed deductions, oldest first. These get deleted.
    pub deductions_consumed: Vec<DeductionId>,
    pub partial: Option<PartialConsumption>,
    #[serde(skip)]
    observed: Vec<(DeductionId, Amount)>,
}

impl ConsumptionPlan {
    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    /// Add the plan's guards and writes to `batch`.
    pub fn write_into(&self, batch: &mut WriteBatch) {
        for (deduction_id, amount) in &self.observed {
            batch.guard(Guard::DeductionAmount {
                deduction_id: *deduction_id,
                amount: *amount,
            });
        }
        for id in &self.deductions_consumed {
            batch.push(WriteOp::DeleteDeduction(*id));
        }
        if let Some(partial) = self.partial {
            batch.push(WriteOp::SetDeductionAmount {
                deduction_id: partial.deduction_id,
                amount: partial.remaining_amount,
            });
        }
    }
}

/// Result of [`consume_deductions`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumptionResult {
    pub amount_deducted: Amount,
    pub deductions_consumed: Vec<DeductionId>,
}

impl From<ConsumptionPlan> for ConsumptionResult {
    fn from(plan: ConsumptionPlan) -> Self {
        Self {
            amount_deducted: plan.amount_deducted,
            deductions_consumed: plan.deductions_consumed,
        }
    }
}

pub fn total_pending(pending: &[Deduction]) -> Amount {
    pending.iter().map(|d| d.amount).sum()
}

/// Walk `pending` (oldest first) and decide how much of `payment` it absorbs.
///
/// A deduction no larger than what is left of the payment is consumed
/// entirely; the first one that is larger is reduced by the remainder and the
/// walk stops. `amount_deducted == min(payment, total_pending)`.
pub fn plan_consumption(pending: &[Deduction], payment: Amount) -> ConsumptionPlan {
    let mut plan = ConsumptionPlan::default();
    let mut remaining = payment;

    for deduction in pending {
        if !remaining.is_positive() {
            break;
        }
        plan.observed.push((deduction.id, deduction.amount));

        if deduction.amount <= remaining {
            remaining -= deduction.amount;
            plan.deductions_consumed.push(deduction.id);
        } else {
            plan.partial = Some(PartialConsumption {
                deduction_id: deduction.id,
                previous_amount: deduction.amount,
                remaining_amount: deduction.amount - remaining,
            });
            remaining = Amount::ZERO;
        }
    }

    plan.amount_deducted = if payment.is_positive() {
        payment - remaining
    } else {
        Amount::ZERO
    };
    plan
}

/// Offset `payment` against the child's pending deductions and commit the result.
///
/// # Errors
/// `NotFound` if the child does not exist, `Conflict` if another writer
/// touched the same deductions between the read and the commit.
pub fn consume_deductions<S: LedgerStore + ?Sized>(
    store: &S,
    child_id: ChildId,
    payment: Amount,
) -> Result<ConsumptionResult> {
    if store.child(child_id)?.is_none() {
        return Err(LedgerError::not_found("child", child_id));
    }

    let pending = store.pending_deductions(child_id)?;
    let plan = plan_consumption(&pending, payment);
    if plan.is_empty() {
        return Ok(ConsumptionResult::default());
    }

    let mut batch = WriteBatch::new();
    plan.write_into(&mut batch);
    store.commit(batch)?;

    debug!(
        child_id = %child_id,
        deducted = %plan.amount_deducted,
        consumed = plan.deductions_consumed.len(),
        "consumed deductions"
    );
    Ok(plan.into())
}
