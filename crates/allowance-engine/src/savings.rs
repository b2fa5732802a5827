//! Saving targets: what a child is saving up for and how far along they are.

use serde::Serialize;

use crate::error::{LedgerError, Result};
use crate::model::SavingTarget;
use crate::money::Amount;
use crate::service::clean;

/// User-supplied fields of a saving target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavingTargetDraft {
    pub name: String,
    pub target_amount: Amount,
    pub description: Option<String>,
    pub link: Option<String>,
}

impl SavingTargetDraft {
    pub fn new(name: impl Into<String>, target_amount: Amount) -> Self {
        Self {
            name: name.into(),
            target_amount,
            description: None,
            link: None,
        }
    }

    /// Trimmed copy, or `Validation` if the name is blank or the amount is out of range.
    pub(crate) fn validated(self) -> Result<Self> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(LedgerError::Validation("name is required".to_string()));
        }
        if !self.target_amount.is_positive() || !self.target_amount.within_entry_limit() {
            return Err(LedgerError::Validation(format!(
                "target amount must be between 0.01 and {}, got {}",
                Amount::MAX_ENTRY,
                self.target_amount
            )));
        }
        Ok(Self {
            name,
            target_amount: self.target_amount,
            description: clean(self.description),
            link: clean(self.link),
        })
    }
}

/// A saving target together with the child's progress towards it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavingTargetProgress {
    #[serde(flatten)]
    pub target: SavingTarget,
    pub balance: Amount,
    /// Still missing; zero once reached.
    pub remaining: Amount,
    /// Whole percent, 0-100.
    pub percent: u8,
    pub reached: bool,
}

pub fn progress(target: SavingTarget, balance: Amount) -> SavingTargetProgress {
    let goal = target.target_amount;
    let reached = balance >= goal;
    let remaining = if reached { Amount::ZERO } else { goal - balance };
    let percent = if reached {
        100
    } else if !balance.is_positive() || !goal.is_positive() {
        0
    } else {
        let ratio = i128::from(balance.cents()) * 100 / i128::from(goal.cents());
        u8::try_from(ratio).unwrap_or(100)
    };
    SavingTargetProgress {
        target,
        balance,
        remaining,
        percent,
        reached,
    }
}
