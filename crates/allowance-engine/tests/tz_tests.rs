//! Tests for civil time <-> instant conversion, including DST gaps and overlaps.

use allowance_engine::dst::DstResolution;
use allowance_engine::error::LedgerError;
use allowance_engine::tz::{
    date_parts_in_zone, day_of_week_in_zone, days_in_month, local_to_utc, local_to_utc_detailed,
    parse_timezone, DateParts,
};
use chrono::{TimeZone, Utc};
use chrono_tz::Tz;

fn zone(name: &str) -> Tz {
    parse_timezone(name).expect("known zone")
}

// ---------------------------------------------------------------------------
// local_to_utc
// ---------------------------------------------------------------------------

#[test]
fn winter_time_uses_standard_offset() {
    // 09:00 EST (UTC-5) → 14:00 UTC
    let instant = local_to_utc(2025, 1, 15, 9, zone("America/New_York")).unwrap();
    assert_eq!(instant, Utc.with_ymd_and_hms(2025, 1, 15, 14, 0, 0).unwrap());
}

#[test]
fn summer_time_uses_daylight_offset() {
    // 09:00 EDT (UTC-4) → 13:00 UTC
    let instant = local_to_utc(2025, 7, 1, 9, zone("America/New_York")).unwrap();
    assert_eq!(instant, Utc.with_ymd_and_hms(2025, 7, 1, 13, 0, 0).unwrap());
}

#[test]
fn spring_forward_gap_clamps_to_first_valid_instant() {
    // 02:00 on 2025-03-09 does not exist in New York; clocks jump to 03:00 EDT.
    let (instant, resolution) =
        local_to_utc_detailed(2025, 3, 9, 2, zone("America/New_York")).unwrap();
    assert_eq!(instant, Utc.with_ymd_and_hms(2025, 3, 9, 7, 0, 0).unwrap());
    assert_eq!(resolution, DstResolution::GapShifted);
    assert!(resolution.is_anomaly());
}

#[test]
fn london_gap_at_one_am() {
    // 01:00 GMT on 2025-03-30 is skipped; 02:00 BST == 01:00 UTC.
    let instant = local_to_utc(2025, 3, 30, 1, zone("Europe/London")).unwrap();
    assert_eq!(instant, Utc.with_ymd_and_hms(2025, 3, 30, 1, 0, 0).unwrap());
}

#[test]
fn fall_back_overlap_picks_earlier_offset() {
    // 01:00 on 2025-11-02 happens twice in New York: EDT (05:00Z) then EST (06:00Z).
    let (instant, resolution) =
        local_to_utc_detailed(2025, 11, 2, 1, zone("America/New_York")).unwrap();
    assert_eq!(instant, Utc.with_ymd_and_hms(2025, 11, 2, 5, 0, 0).unwrap());
    assert_eq!(resolution, DstResolution::OverlapEarliest);
}

#[test]
fn exact_times_report_no_anomaly() {
    let (_, resolution) = local_to_utc_detailed(2025, 6, 1, 12, zone("Asia/Tokyo")).unwrap();
    assert_eq!(resolution, DstResolution::Exact);
    assert!(!resolution.is_anomaly());
}

#[test]
fn invalid_calendar_date_is_rejected() {
    let err = local_to_utc(2025, 2, 30, 9, zone("UTC")).unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "got {err:?}");
}

#[test]
fn hour_out_of_range_is_rejected() {
    let err = local_to_utc(2025, 2, 1, 24, zone("UTC")).unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "got {err:?}");
}

#[test]
fn unknown_timezone_is_rejected() {
    let err = parse_timezone("Mars/Olympus_Mons").unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTimezone(ref name) if name == "Mars/Olympus_Mons"));
}

// ---------------------------------------------------------------------------
// Zone-local calendar reads
// ---------------------------------------------------------------------------

#[test]
fn date_parts_follow_the_zone_not_utc() {
    // 03:00 UTC on Jan 15 is still 22:00 on Jan 14 in New York.
    let instant = Utc.with_ymd_and_hms(2025, 1, 15, 3, 0, 0).unwrap();
    assert_eq!(
        date_parts_in_zone(instant, zone("America/New_York")),
        DateParts {
            year: 2025,
            month: 1,
            day: 14,
            hour: 22
        }
    );
    assert_eq!(
        date_parts_in_zone(instant, zone("UTC")),
        DateParts {
            year: 2025,
            month: 1,
            day: 15,
            hour: 3
        }
    );
}

#[test]
fn day_of_week_follows_the_zone() {
    let instant = Utc.with_ymd_and_hms(2025, 1, 15, 3, 0, 0).unwrap();
    // Wednesday in UTC, Tuesday in New York.
    assert_eq!(day_of_week_in_zone(instant, zone("UTC")), 3);
    assert_eq!(day_of_week_in_zone(instant, zone("America/New_York")), 2);

    // 20:00 UTC Wednesday is already Thursday morning in Tokyo.
    let evening = Utc.with_ymd_and_hms(2025, 1, 15, 20, 0, 0).unwrap();
    assert_eq!(day_of_week_in_zone(evening, zone("Asia/Tokyo")), 4);
}

#[test]
fn sunday_is_zero() {
    let sunday = Utc.with_ymd_and_hms(2025, 1, 19, 12, 0, 0).unwrap();
    assert_eq!(day_of_week_in_zone(sunday, zone("UTC")), 0);
}

#[test]
fn month_lengths() {
    assert_eq!(days_in_month(2024, 2), 29);
    assert_eq!(days_in_month(2025, 2), 28);
    assert_eq!(days_in_month(2025, 4), 30);
    assert_eq!(days_in_month(2025, 12), 31);
}
