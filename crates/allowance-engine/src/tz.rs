//! Civil time <-> instant conversion in IANA timezones.
//!
//! Every calendar decision in the engine (what "tomorrow" or "Friday" means)
//! is taken in the rule's own zone, never in UTC. DST anomalies are resolved
//! deterministically and are never reported as errors:
//!
//! - spring-forward gap: clamp forward to the first valid local minute
//! - fall-back overlap: the earlier of the two instants

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::dst::DstResolution;
use crate::error::{LedgerError, Result};

/// Upper bound on how far the gap search walks forward. No zone skips more than a day.
const MAX_GAP_MINUTES: u32 = 24 * 60;

/// Zone-local calendar components of an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateParts {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
}

/// Parse an IANA timezone identifier (e.g., "America/New_York").
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| LedgerError::InvalidTimezone(name.to_string()))
}

/// Resolve a civil date and hour in `tz` to an absolute instant.
///
/// # Errors
/// Returns `LedgerError::Validation` if the date does not exist in the
/// proleptic Gregorian calendar or `hour > 23`. DST gaps and overlaps are not
/// errors; see [`local_to_utc_detailed`].
pub fn local_to_utc(year: i32, month: u32, day: u32, hour: u32, tz: Tz) -> Result<DateTime<Utc>> {
    local_to_utc_detailed(year, month, day, hour, tz).map(|(instant, _)| instant)
}

/// Like [`local_to_utc`], also reporting how a DST anomaly was resolved.
pub fn local_to_utc_detailed(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    tz: Tz,
) -> Result<(DateTime<Utc>, DstResolution)> {
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        LedgerError::Validation(format!("invalid date {:04}-{:02}-{:02}", year, month, day))
    })?;
    let time = NaiveTime::from_hms_opt(hour, 0, 0)
        .ok_or_else(|| LedgerError::Validation(format!("hour must be 0-23, got {}", hour)))?;

    Ok(resolve_local(date.and_time(time), tz))
}

/// Map a naive local datetime in `tz` onto an instant.
pub fn resolve_local(naive: NaiveDateTime, tz: Tz) -> (DateTime<Utc>, DstResolution) {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => (dt.with_timezone(&Utc), DstResolution::Exact),
        ambiguous @ chrono::LocalResult::Ambiguous(..) => {
            let earliest = ambiguous
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive));
            (earliest, DstResolution::OverlapEarliest)
        }
        chrono::LocalResult::None => (first_valid_after_gap(naive, tz), DstResolution::GapShifted),
    }
}

fn first_valid_after_gap(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    let mut candidate = naive;
    for _ in 0..MAX_GAP_MINUTES {
        candidate += Duration::minutes(1);
        if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
            return dt.with_timezone(&Utc);
        }
    }
    Utc.from_utc_datetime(&naive)
}

/// Instant of `hour:00` local time on a civil date in `tz`.
///
/// `hour` is clamped to 23; callers validate it beforehand.
pub fn at_local_hour(date: NaiveDate, hour: u32, tz: Tz) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    resolve_local(date.and_time(time), tz).0
}

/// Civil date of an instant as observed in `tz`.
pub fn local_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// Day of week (Sunday = 0 ... Saturday = 6) as observed in `tz`.
pub fn day_of_week_in_zone(instant: DateTime<Utc>, tz: Tz) -> u32 {
    instant.with_timezone(&tz).weekday().num_days_from_sunday()
}

/// Zone-local year/month/day/hour of an instant.
pub fn date_parts_in_zone(instant: DateTime<Utc>, tz: Tz) -> DateParts {
    let local = instant.with_timezone(&tz);
    DateParts {
        year: local.year(),
        month: local.month(),
        day: local.day(),
        hour: local.hour(),
    }
}

/// Number of days in a calendar month (28-31).
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month >= 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(31)
}

/// Serde adapter storing a [`Tz`] as its IANA name.
pub(crate) mod serde_tz {
    use chrono_tz::Tz;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(tz.name())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Tz, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse()
            .map_err(|_| de::Error::custom(format!("unknown timezone '{}'", name)))
    }
}
