//! `allowance` CLI: keep a household allowance ledger in a JSON state file
//! and run due recurring payments.
//!
//! ## Usage
//!
//! ```sh
//! # Register a child and pay them 5.00 every Friday at 09:00 Stockholm time
//! allowance add-child Ada
//! allowance add-rule <CHILD_ID> 5 --kind weekly --day-of-week 5 --hour 9 --timezone Europe/Stockholm
//!
//! # Manual money movements
//! allowance deposit <CHILD_ID> 12.50 --description "Birthday"
//! allowance advance <CHILD_ID> 2
//!
//! # Settle every due rule (run this from cron)
//! allowance tick
//!
//! # Skip next Friday, save up for something
//! allowance skip <RULE_ID>
//! allowance add-target <CHILD_ID> Bike 80
//!
//! # Read views
//! allowance balance <CHILD_ID>
//! allowance history <CHILD_ID> --days 14
//!
//! # Pin "now" for reproducible runs
//! allowance --now 2025-01-17T09:00:00Z tick
//! ```
//!
//! Logs go to stderr and are controlled by `RUST_LOG`
//! (default `allowance_engine=info,allowance=info`).

mod outbox;
mod state;

use std::path::PathBuf;
use std::sync::{Arc, Once};

use allowance_engine::balance::recent_transactions;
use allowance_engine::money::format_money;
use allowance_engine::notify::NullNotifier;
use allowance_engine::schedule::preview_runs;
use allowance_engine::tz::{local_to_utc_detailed, parse_timezone};
use allowance_engine::{
    AllowanceService, Amount, Clock, EngineConfig, FixedClock, Interval, LedgerStore, MemoryStore,
    Notifier, RuleDraft, SavingTargetDraft, Schedule, SystemClock,
};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::outbox::OutboxNotifier;
use crate::state::{load_store, save_store, StateLock};

type Service = AllowanceService<MemoryStore, dyn Notifier, Arc<dyn Clock>>;

#[derive(Parser)]
#[command(
    name = "allowance",
    version,
    about = "Recurring allowance scheduler and ledger"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Ledger state file (created on first write)
    #[arg(long, global = true, default_value = "allowance.json")]
    state: PathBuf,

    /// TOML configuration file; defaults apply when it does not exist
    #[arg(long, global = true, default_value = "allowance.toml")]
    config: PathBuf,

    /// Treat this RFC 3339 instant as the current time
    #[arg(long, global = true)]
    now: Option<DateTime<Utc>>,

    /// Append signed webhook events to this file
    #[arg(long, global = true)]
    outbox: Option<PathBuf>,
}

#[derive(Args)]
struct MoneyArgs {
    child: Uuid,
    /// Amount in major units, e.g. 5 or 12.50
    amount: Amount,
    #[arg(short, long)]
    description: Option<String>,
    /// Acting user recorded on the transaction
    #[arg(long)]
    user: Option<Uuid>,
}

/// Schedule fields. Omitted values fall back to config (new rules) or to the
/// rule's current schedule (edits).
#[derive(Args)]
struct ScheduleArgs {
    /// daily, weekly, monthly or custom
    #[arg(long)]
    kind: Option<String>,
    /// Sunday = 0 ... Saturday = 6
    #[arg(long)]
    day_of_week: Option<u32>,
    /// 1-31, clamped to short months
    #[arg(long)]
    day_of_month: Option<u32>,
    /// Spacing for custom schedules
    #[arg(long)]
    interval_days: Option<u32>,
    /// Local hour of day, 0-23
    #[arg(long)]
    hour: Option<u32>,
    /// IANA zone name
    #[arg(long)]
    timezone: Option<String>,
}

impl ScheduleArgs {
    fn touches_interval(&self) -> bool {
        self.kind.is_some()
            || self.day_of_week.is_some()
            || self.day_of_month.is_some()
            || self.interval_days.is_some()
    }

    fn build(&self, base: &Schedule) -> Result<Schedule> {
        let interval = if self.touches_interval() {
            let kind = self.kind.as_deref().unwrap_or(base.interval.kind());
            Interval::from_parts(
                kind,
                self.interval_days,
                self.day_of_week,
                self.day_of_month,
            )?
        } else {
            base.interval
        };
        let timezone = match &self.timezone {
            Some(name) => parse_timezone(name)?,
            None => base.timezone,
        };
        Ok(Schedule::new(interval, self.hour.unwrap_or(base.hour), timezone)?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Register a child
    AddChild {
        name: String,
        #[arg(long)]
        family: Option<Uuid>,
    },
    /// List children
    Children,
    RenameChild { child: Uuid, name: String },
    /// Delete a child with all their rules, deductions, targets and transactions
    DeleteChild { child: Uuid },
    /// Add money to a child's balance
    Deposit(MoneyArgs),
    /// Take money out (fails if the balance is too low)
    Withdraw(MoneyArgs),
    /// Pay out now and deduct the same amount from future recurring payments
    Advance(MoneyArgs),
    /// Record a deduction against future recurring payments without paying out
    Deduct {
        child: Uuid,
        amount: Amount,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// List a child's pending deductions, oldest first
    Deductions { child: Uuid },
    /// Create a recurring payment rule
    AddRule {
        child: Uuid,
        amount: Amount,
        #[arg(short, long)]
        description: Option<String>,
        #[command(flatten)]
        schedule: ScheduleArgs,
    },
    /// Change a rule; its next run is recomputed from now
    EditRule {
        rule: Uuid,
        #[arg(long)]
        amount: Option<Amount>,
        #[arg(short, long)]
        description: Option<String>,
        #[command(flatten)]
        schedule: ScheduleArgs,
    },
    /// Stop a rule from paying out
    Pause { rule: Uuid },
    /// Re-enable a paused rule; missed periods are not paid
    Resume { rule: Uuid },
    DeleteRule { rule: Uuid },
    /// Waive the rule's next due payment (or cancel that with --cancel)
    Skip {
        rule: Uuid,
        #[arg(long)]
        cancel: bool,
    },
    /// List a child's rules
    Rules { child: Uuid },
    /// Add something the child is saving up for
    AddTarget {
        child: Uuid,
        name: String,
        amount: Amount,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(long)]
        link: Option<String>,
    },
    EditTarget {
        target: Uuid,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        amount: Option<Amount>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(long)]
        link: Option<String>,
    },
    DeleteTarget { target: Uuid },
    /// A child's saving targets with progress
    Targets { child: Uuid },
    /// Settle every due rule once
    Tick,
    Balance { child: Uuid },
    /// Closing balance per day in the display timezone
    History {
        child: Uuid,
        #[arg(long)]
        days: Option<u32>,
    },
    /// Running balance after each transaction
    Events {
        child: Uuid,
        /// Window in days (0 for all time)
        #[arg(long, conflicts_with = "count")]
        days: Option<u32>,
        /// Only the most recent N transactions
        #[arg(long)]
        count: Option<usize>,
    },
    /// Recent transactions, newest first
    Transactions {
        child: Uuid,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Preview upcoming run times for a schedule
    NextRun {
        #[command(flatten)]
        schedule: ScheduleArgs,
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
    /// Convert a wall-clock hour in a zone to UTC, reporting DST adjustments
    Resolve {
        /// YYYY-MM-DD
        date: chrono::NaiveDate,
        hour: u32,
        timezone: String,
    },
}

impl Commands {
    fn writes_state(&self) -> bool {
        matches!(
            self,
            Commands::AddChild { .. }
                | Commands::RenameChild { .. }
                | Commands::DeleteChild { .. }
                | Commands::Deposit(_)
                | Commands::Withdraw(_)
                | Commands::Advance(_)
                | Commands::Deduct { .. }
                | Commands::AddRule { .. }
                | Commands::EditRule { .. }
                | Commands::Pause { .. }
                | Commands::Resume { .. }
                | Commands::DeleteRule { .. }
                | Commands::Skip { .. }
                | Commands::AddTarget { .. }
                | Commands::EditTarget { .. }
                | Commands::DeleteTarget { .. }
                | Commands::Tick
        )
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = EngineConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;
    let clock: Arc<dyn Clock> = match cli.now {
        Some(now) => Arc::new(FixedClock::new(now)),
        None => Arc::new(SystemClock),
    };

    // Stateless helpers never touch the ledger.
    match &cli.command {
        Commands::NextRun { schedule, count } => {
            let base = default_schedule(&config)?;
            let schedule = schedule.build(&base)?;
            let runs = preview_runs(&schedule, clock.now(), *count);
            return print_json(&json!({
                "schedule": schedule.label(),
                "runs": runs,
            }));
        }
        Commands::Resolve {
            date,
            hour,
            timezone,
        } => {
            use chrono::Datelike;
            let tz = parse_timezone(timezone)?;
            let (instant, resolution) =
                local_to_utc_detailed(date.year(), date.month(), date.day(), *hour, tz)?;
            return print_json(&json!({
                "utc": instant,
                "resolution": resolution,
            }));
        }
        _ => {}
    }

    // Held until the end of main so concurrent invocations serialize load, mutate and save.
    let _lock = StateLock::acquire(&cli.state)?;
    let store = Arc::new(load_store(&cli.state)?);
    let outbox = cli.outbox.as_ref().map(|path| {
        Arc::new(OutboxNotifier::new(
            path.clone(),
            config.webhook_secret.clone(),
            config.family_id,
            Arc::clone(&clock),
        ))
    });
    let notifier: Arc<dyn Notifier> = match &outbox {
        Some(outbox) => Arc::clone(outbox) as Arc<dyn Notifier>,
        None => Arc::new(NullNotifier),
    };
    let service: Service = AllowanceService::new(Arc::clone(&store), notifier, Arc::clone(&clock));

    let writes = cli.command.writes_state();
    run(cli.command, &service, &config)?;

    if writes {
        save_store(&store, &cli.state)?;
    }
    if let Some(outbox) = outbox {
        // Events are only released once the ledger is on disk.
        if let Err(err) = outbox.flush() {
            error!(error = %err, "outbox append failed after the ledger was saved");
            return Err(err);
        }
    }
    Ok(())
}

fn run(command: Commands, service: &Service, config: &EngineConfig) -> Result<()> {
    match command {
        Commands::AddChild { name, family } => {
            let family = family.or(config.family_id);
            print_json(&service.add_child(&name, family)?)
        }
        Commands::Children => print_json(&service.children()?),
        Commands::RenameChild { child, name } => print_json(&service.rename_child(child, &name)?),
        Commands::DeleteChild { child } => {
            service.delete_child(child)?;
            print_json(&json!({ "deleted": child }))
        }
        Commands::Deposit(args) => print_json(&service.deposit(
            args.child,
            args.amount,
            args.description,
            args.user,
        )?),
        Commands::Withdraw(args) => print_json(
            &service
                .withdraw(args.child, args.amount, args.description, args.user)
                .context("Withdrawal refused")?,
        ),
        Commands::Advance(args) => {
            let (transaction, deduction) =
                service.advance_payment(args.child, args.amount, args.description, args.user)?;
            print_json(&json!({
                "transaction": transaction,
                "deduction": deduction,
            }))
        }
        Commands::Deduct {
            child,
            amount,
            description,
        } => print_json(&service.add_deduction(child, amount, description)?),
        Commands::Deductions { child } => print_json(&service.pending_deductions(child)?),
        Commands::AddRule {
            child,
            amount,
            description,
            schedule,
        } => {
            let schedule = schedule.build(&default_schedule(config)?)?;
            let rule = service.create_rule(
                child,
                RuleDraft {
                    amount,
                    description,
                    schedule,
                },
            )?;
            print_json(&rule)
        }
        Commands::EditRule {
            rule,
            amount,
            description,
            schedule,
        } => {
            let current = service
                .store()
                .rule(rule)?
                .with_context(|| format!("Rule not found: {}", rule))?;
            let draft = RuleDraft {
                amount: amount.unwrap_or(current.amount),
                description: description.or(current.description.clone()),
                schedule: schedule.build(&current.schedule)?,
            };
            print_json(&service.edit_rule(rule, draft)?)
        }
        Commands::Pause { rule } => print_json(&service.set_rule_active(rule, false)?),
        Commands::Resume { rule } => print_json(&service.set_rule_active(rule, true)?),
        Commands::DeleteRule { rule } => {
            service.delete_rule(rule)?;
            print_json(&json!({ "deleted": rule }))
        }
        Commands::Skip { rule, cancel } => print_json(&service.set_skip_next(rule, !cancel)?),
        Commands::Rules { child } => print_json(&service.rules_for_child(child)?),
        Commands::AddTarget {
            child,
            name,
            amount,
            description,
            link,
        } => {
            let draft = SavingTargetDraft {
                name,
                target_amount: amount,
                description,
                link,
            };
            print_json(&service.add_saving_target(child, draft)?)
        }
        Commands::EditTarget {
            target,
            name,
            amount,
            description,
            link,
        } => {
            let current = service
                .store()
                .saving_target(target)?
                .with_context(|| format!("Saving target not found: {}", target))?;
            let draft = SavingTargetDraft {
                name: name.unwrap_or(current.name),
                target_amount: amount.unwrap_or(current.target_amount),
                description: description.or(current.description),
                link: link.or(current.link),
            };
            print_json(&service.edit_saving_target(target, draft)?)
        }
        Commands::DeleteTarget { target } => {
            service.delete_saving_target(target)?;
            print_json(&json!({ "deleted": target }))
        }
        Commands::Targets { child } => print_json(&service.saving_targets(child)?),
        Commands::Tick => {
            let report = service.processor().run()?;
            info!(
                processed = report.processed,
                skipped = report.skipped,
                contended = report.contended,
                "tick finished"
            );
            print_json(&report)
        }
        Commands::Balance { child } => {
            let balance = service.balance(child)?;
            print_json(&json!({
                "child_id": child,
                "balance": balance,
                "display": format_money(balance, &config.currency),
            }))
        }
        Commands::History { child, days } => {
            let window = days.unwrap_or(config.history_window_days);
            print_json(&service.history(child, window, config.timezone()?)?)
        }
        Commands::Events { child, days, count } => match count {
            Some(count) => print_json(&service.events_by_count(child, count)?),
            None => print_json(&service.events(
                child,
                days.unwrap_or(config.history_window_days),
            )?),
        },
        Commands::Transactions { child, limit } => {
            let all = service.recent_transactions(child, 0)?;
            print_json(&recent_transactions(
                &all,
                limit.unwrap_or(config.recent_limit),
            ))
        }
        Commands::NextRun { .. } | Commands::Resolve { .. } => {
            bail!("command does not operate on the ledger")
        }
    }
}

fn default_schedule(config: &EngineConfig) -> Result<Schedule> {
    let interval = Interval::from_parts("weekly", None, None, None)?;
    Ok(Schedule::new(interval, config.default_hour, config.timezone()?)?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "allowance_engine=info,allowance=info".into());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
