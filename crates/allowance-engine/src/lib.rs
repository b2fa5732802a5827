//! # allowance-engine
//!
//! Recurring allowance scheduling and ledger consistency for a household
//! pocket-money ledger.
//!
//! Children accrue and spend money through manual transactions and recurring
//! payments. One-off deductions (for example an advance on next week's
//! allowance) are offset FIFO against future payments. The engine computes
//! DST-correct run times in each rule's own timezone, settles due rules
//! atomically, and rebuilds balance history from the append-only log.
//!
//! ## Modules
//!
//! - [`tz`]: civil time ↔ instant in IANA zones
//! - [`dst`]: how DST gaps and overlaps were resolved
//! - [`clock`]: injectable time source
//! - [`schedule`]: next-run calculation for recurring rules
//! - [`deduction`]: FIFO deduction consumption
//! - [`processor`]: due-rule processing for one scheduler tick
//! - [`balance`]: balance, daily history and per-transaction views
//! - [`savings`]: saving targets and progress
//! - [`service`]: manual ledger actions and rule management
//! - [`store`] / [`memory`]: storage contract and in-memory store
//! - [`notify`]: fire-and-forget events and webhook signing
//! - [`money`]: fixed-point amounts and currency display
//! - [`config`]: TOML configuration
//! - [`error`]: error types

pub mod balance;
pub mod clock;
pub mod config;
pub mod deduction;
pub mod dst;
pub mod error;
pub mod memory;
pub mod model;
pub mod money;
pub mod notify;
pub mod processor;
pub mod savings;
pub mod schedule;
pub mod service;
pub mod store;
pub mod tz;

pub use balance::{BalanceEvent, DailyBalance};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use deduction::{consume_deductions, ConsumptionResult};
pub use dst::DstResolution;
pub use error::LedgerError;
pub use memory::MemoryStore;
pub use model::{Child, Deduction, RecurringRule, SavingTarget, Transaction};
pub use money::Amount;
pub use notify::Notifier;
pub use processor::{DueRuleProcessor, ProcessReport, RuleOutcome};
pub use savings::{SavingTargetDraft, SavingTargetProgress};
pub use schedule::{calculate_next_run, calculate_next_run_from_current, Interval, Schedule};
pub use service::{AllowanceService, RuleDraft};
pub use store::LedgerStore;
pub use tz::{date_parts_in_zone, day_of_week_in_zone, local_to_utc};
