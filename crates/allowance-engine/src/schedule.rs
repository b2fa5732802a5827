//! Recurrence calculation -- when does a recurring payment run next?
//!
//! Two entry points:
//!
//! - [`calculate_next_run`] computes the first run relative to "now" (rule
//!   creation, edits, resuming a paused rule).
//! - [`calculate_next_run_from_current`] rolls a rule forward from its previous
//!   scheduled instant after processing, so a late tick never shifts the cadence.
//!
//! Calendar steps (days, weeks, months) are taken on the civil calendar of the
//! rule's timezone and re-resolved at the configured hour, so a 07:00 allowance
//! stays at 07:00 local across DST changes. `Every(N)` is a fixed multiple of
//! 86 400 seconds and ignores the zone.

use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::tz::{self, at_local_hour, days_in_month, local_date};

pub const DEFAULT_DAY_OF_WEEK: u32 = 1;
pub const DEFAULT_DAY_OF_MONTH: u32 = 1;
pub const DEFAULT_INTERVAL_DAYS: u32 = 7;

const SECONDS_PER_DAY: i64 = 86_400;

/// Bound on rollover steps when catching up after a long outage.
const MAX_CATCH_UP_STEPS: usize = 10_000;

const WEEKDAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// How often a recurring payment repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interval {
    Daily,
    /// `day_of_week`: Sunday = 0 ... Saturday = 6.
    Weekly { day_of_week: u32 },
    /// `day_of_month`: 1-31, clamped to the length of each target month.
    Monthly { day_of_month: u32 },
    /// Fixed spacing of `days` * 86 400 seconds.
    Every { days: u32 },
}

impl Interval {
    /// Build an interval from its storage/form tag and optional parameters.
    ///
    /// Accepted tags: `daily`, `weekly`, `monthly`, `custom` (alias `every`).
    /// Missing parameters fall back to Monday, the 1st, and 7 days.
    ///
    /// # Errors
    /// `LedgerError::InvalidScheduleKind` for an unknown tag, `Validation` for
    /// out-of-range parameters.
    pub fn from_parts(
        kind: &str,
        interval_days: Option<u32>,
        day_of_week: Option<u32>,
        day_of_month: Option<u32>,
    ) -> Result<Self> {
        let interval = match kind.trim().to_ascii_lowercase().as_str() {
            "daily" => Interval::Daily,
            "weekly" => Interval::Weekly {
                day_of_week: day_of_week.unwrap_or(DEFAULT_DAY_OF_WEEK),
            },
            "monthly" => Interval::Monthly {
                day_of_month: day_of_month.unwrap_or(DEFAULT_DAY_OF_MONTH),
            },
            "custom" | "every" => Interval::Every {
                days: interval_days.unwrap_or(DEFAULT_INTERVAL_DAYS),
            },
            other => return Err(LedgerError::InvalidScheduleKind(other.to_string())),
        };
        interval.validate()?;
        Ok(interval)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Interval::Daily => "daily",
            Interval::Weekly { .. } => "weekly",
            Interval::Monthly { .. } => "monthly",
            Interval::Every { .. } => "custom",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            Interval::Daily => Ok(()),
            Interval::Weekly { day_of_week } if day_of_week > 6 => Err(LedgerError::Validation(
                format!("day_of_week must be 0-6, got {}", day_of_week),
            )),
            Interval::Monthly { day_of_month } if !(1..=31).contains(&day_of_month) => {
                Err(LedgerError::Validation(format!(
                    "day_of_month must be 1-31, got {}",
                    day_of_month
                )))
            }
            Interval::Every { days } if days == 0 => Err(LedgerError::Validation(
                "interval_days must be at least 1".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Human-readable cadence, e.g. "Weekly on Friday".
    pub fn label(&self) -> String {
        match *self {
            Interval::Daily => "Daily".to_string(),
            Interval::Weekly { day_of_week } => format!(
                "Weekly on {}",
                WEEKDAY_NAMES.get(day_of_week as usize).unwrap_or(&"?")
            ),
            Interval::Monthly { day_of_month } => format!("Monthly on day {}", day_of_month),
            Interval::Every { days: 1 } => "Every day".to_string(),
            Interval::Every { days } => format!("Every {} days", days),
        }
    }
}

/// A complete schedule: cadence, local hour, and the zone that defines "local".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub interval: Interval,
    /// Hour of day (0-23) in `timezone`.
    pub hour: u32,
    #[serde(with = "crate::tz::serde_tz")]
    pub timezone: Tz,
}

impl Schedule {
    pub fn new(interval: Interval, hour: u32, timezone: Tz) -> Result<Self> {
        interval.validate()?;
        if hour > 23 {
            return Err(LedgerError::Validation(format!(
                "hour must be 0-23, got {}",
                hour
            )));
        }
        Ok(Self {
            interval,
            hour,
            timezone,
        })
    }

    /// Build a schedule from loosely-typed form fields.
    pub fn from_parts(
        kind: &str,
        interval_days: Option<u32>,
        day_of_week: Option<u32>,
        day_of_month: Option<u32>,
        hour: u32,
        timezone: &str,
    ) -> Result<Self> {
        let interval = Interval::from_parts(kind, interval_days, day_of_week, day_of_month)?;
        Schedule::new(interval, hour, tz::parse_timezone(timezone)?)
    }

    pub fn label(&self) -> String {
        format!(
            "{} at {:02}:00 ({})",
            self.interval.label(),
            self.hour,
            self.timezone.name()
        )
    }
}

/// First run of `schedule` strictly after `now`.
///
/// - Daily: tomorrow (zone-local) at `hour`.
/// - Weekly: the next matching weekday; if today matches, one week out.
/// - Monthly: the clamped day this month if still ahead of today, else next month.
/// - Every(N): `now + N days` of fixed length.
pub fn calculate_next_run(schedule: &Schedule, now: DateTime<Utc>) -> DateTime<Utc> {
    let tz = schedule.timezone;
    let today = local_date(now, tz);

    match schedule.interval {
        Interval::Daily => at_local_hour(add_days(today, 1), schedule.hour, tz),
        Interval::Weekly { day_of_week } => {
            let current = today.weekday().num_days_from_sunday();
            let ahead = match (day_of_week + 7 - current) % 7 {
                0 => 7,
                n => n,
            };
            at_local_hour(add_days(today, u64::from(ahead)), schedule.hour, tz)
        }
        Interval::Monthly { day_of_month } => {
            let this_month = clamped_date(today.year(), today.month(), day_of_month);
            let target = if this_month > today {
                this_month
            } else {
                let (year, month) = next_month(today.year(), today.month());
                clamped_date(year, month, day_of_month)
            };
            at_local_hour(target, schedule.hour, tz)
        }
        Interval::Every { days } => now + fixed_days(days),
    }
}

/// Next run after the previously scheduled instant `previous`.
///
/// Always strictly after `previous`. The zone and hour come from `schedule`,
/// so an edited rule rolls over on its current settings.
pub fn calculate_next_run_from_current(
    schedule: &Schedule,
    previous: DateTime<Utc>,
) -> DateTime<Utc> {
    let tz = schedule.timezone;
    let anchor = local_date(previous, tz);

    match schedule.interval {
        Interval::Daily => at_local_hour(add_days(anchor, 1), schedule.hour, tz),
        Interval::Weekly { .. } => at_local_hour(add_days(anchor, 7), schedule.hour, tz),
        Interval::Monthly { day_of_month } => {
            let (year, month) = next_month(anchor.year(), anchor.month());
            at_local_hour(clamped_date(year, month, day_of_month), schedule.hour, tz)
        }
        Interval::Every { days } => previous + fixed_days(days),
    }
}

/// Roll forward from `previous` until the result is strictly after `now`.
///
/// Periods missed during an outage collapse into the single run being
/// processed; the rule does not fire once per missed period.
pub fn advance_past(
    schedule: &Schedule,
    previous: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let mut next = calculate_next_run_from_current(schedule, previous);
    for _ in 0..MAX_CATCH_UP_STEPS {
        if next > now {
            return next;
        }
        next = calculate_next_run_from_current(schedule, next);
    }
    calculate_next_run(schedule, now)
}

/// The next `count` runs after `now`, for previews in rule forms.
pub fn preview_runs(schedule: &Schedule, now: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
    let mut runs = Vec::with_capacity(count);
    if count == 0 {
        return runs;
    }
    let mut next = calculate_next_run(schedule, now);
    runs.push(next);
    while runs.len() < count {
        next = calculate_next_run_from_current(schedule, next);
        runs.push(next);
    }
    runs
}

fn fixed_days(days: u32) -> Duration {
    Duration::seconds(i64::from(days) * SECONDS_PER_DAY)
}

fn add_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days)).unwrap_or(NaiveDate::MAX)
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month >= 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

/// `day` clamped into [1, last day of the month].
fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    let day = day.clamp(1, days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MAX)
}
