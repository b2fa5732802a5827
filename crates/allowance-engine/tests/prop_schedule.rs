//! Property-based tests for timezone resolution, next-run calculation and
//! deduction planning.
//!
//! These verify invariants that hold for *any* valid input, not just the
//! scenarios in `tz_tests.rs`, `schedule_tests.rs` and `deduction_tests.rs`.

use allowance_engine::deduction::{plan_consumption, total_pending};
use allowance_engine::dst::DstResolution;
use allowance_engine::model::Deduction;
use allowance_engine::money::Amount;
use allowance_engine::schedule::{
    advance_past, calculate_next_run, calculate_next_run_from_current, Interval, Schedule,
};
use allowance_engine::tz::{date_parts_in_zone, local_to_utc, local_to_utc_detailed, parse_timezone};
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use proptest::prelude::*;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn arb_timezone() -> impl Strategy<Value = Tz> {
    prop_oneof![
        Just("UTC"),
        Just("America/New_York"),
        Just("America/Los_Angeles"),
        Just("Europe/London"),
        Just("Europe/Berlin"),
        Just("Asia/Tokyo"),
        Just("Australia/Sydney"),
    ]
    .prop_map(|name| parse_timezone(name).unwrap())
}

fn arb_interval() -> impl Strategy<Value = Interval> {
    prop_oneof![
        Just(Interval::Daily),
        (0u32..=6).prop_map(|day_of_week| Interval::Weekly { day_of_week }),
        (1u32..=31).prop_map(|day_of_month| Interval::Monthly { day_of_month }),
        (1u32..=60).prop_map(|days| Interval::Every { days }),
    ]
}

fn arb_schedule() -> impl Strategy<Value = Schedule> {
    (arb_interval(), 0u32..=23, arb_timezone())
        .prop_map(|(interval, hour, tz)| Schedule::new(interval, hour, tz).unwrap())
}

/// Any instant in 2024-2027, to the second.
fn arb_instant() -> impl Strategy<Value = DateTime<Utc>> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().timestamp();
    let end = Utc.with_ymd_and_hms(2027, 12, 31, 0, 0, 0).unwrap().timestamp();
    (start..end).prop_map(|ts| Utc.timestamp_opt(ts, 0).unwrap())
}

/// A valid civil date; day capped at 28 so every month accepts it.
fn arb_civil_date() -> impl Strategy<Value = (i32, u32, u32)> {
    (2024i32..=2027, 1u32..=12, 1u32..=28)
}

fn arb_deductions() -> impl Strategy<Value = Vec<Deduction>> {
    prop::collection::vec(1i64..=5_000, 0..8).prop_map(|amounts| {
        amounts
            .into_iter()
            .enumerate()
            .map(|(i, cents)| Deduction {
                id: Uuid::new_v4(),
                child_id: Uuid::nil(),
                amount: Amount::from_cents(cents),
                description: None,
                created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
                seq: i as u64,
            })
            .collect()
    })
}

// ---------------------------------------------------------------------------
// Timezone resolution
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn local_to_utc_is_monotonic_in_hour(
        (y, m, d) in arb_civil_date(),
        tz in arb_timezone(),
        h1 in 0u32..=23,
        h2 in 0u32..=23,
    ) {
        let (lo, hi) = if h1 <= h2 { (h1, h2) } else { (h2, h1) };
        let a = local_to_utc(y, m, d, lo, tz).unwrap();
        let b = local_to_utc(y, m, d, hi, tz).unwrap();
        prop_assert!(a <= b, "{lo}:00 → {a}, {hi}:00 → {b} in {}", tz.name());
    }

    #[test]
    fn local_to_utc_round_trips_outside_gaps(
        (y, m, d) in arb_civil_date(),
        tz in arb_timezone(),
        h in 0u32..=23,
    ) {
        let (instant, resolution) = local_to_utc_detailed(y, m, d, h, tz).unwrap();
        if resolution != DstResolution::GapShifted {
            let parts = date_parts_in_zone(instant, tz);
            prop_assert_eq!((parts.year, parts.month, parts.day, parts.hour), (y, m, d, h));
        }
    }
}

// ---------------------------------------------------------------------------
// Next-run calculation
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn next_run_is_strictly_after_now(schedule in arb_schedule(), now in arb_instant()) {
        let next = calculate_next_run(&schedule, now);
        prop_assert!(next > now, "{} gave {next} for now={now}", schedule.label());
    }

    #[test]
    fn rollover_is_strictly_after_previous(schedule in arb_schedule(), now in arb_instant()) {
        let first = calculate_next_run(&schedule, now);
        let second = calculate_next_run_from_current(&schedule, first);
        prop_assert!(second > first);
    }

    #[test]
    fn next_run_is_deterministic(schedule in arb_schedule(), now in arb_instant()) {
        prop_assert_eq!(calculate_next_run(&schedule, now), calculate_next_run(&schedule, now));
        prop_assert_eq!(
            calculate_next_run_from_current(&schedule, now),
            calculate_next_run_from_current(&schedule, now)
        );
    }

    #[test]
    fn advance_past_lands_after_now(
        schedule in arb_schedule(),
        previous in arb_instant(),
        lag_hours in 0i64..=24 * 120,
    ) {
        let now = previous + chrono::Duration::hours(lag_hours);
        prop_assert!(advance_past(&schedule, previous, now) > now);
    }

    /// Hours 4-23 avoid every DST gap in the zones above.
    #[test]
    fn daily_rollover_preserves_local_hour(
        tz in arb_timezone(),
        hour in 4u32..=23,
        now in arb_instant(),
        steps in 1usize..=40,
    ) {
        let schedule = Schedule::new(Interval::Daily, hour, tz).unwrap();
        let mut run = calculate_next_run(&schedule, now);
        for _ in 0..steps {
            run = calculate_next_run_from_current(&schedule, run);
            prop_assert_eq!(date_parts_in_zone(run, tz).hour, hour);
        }
    }
}

// ---------------------------------------------------------------------------
// Deduction planning
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn deducted_is_min_of_payment_and_pending(
        deductions in arb_deductions(),
        payment in 0i64..=20_000,
    ) {
        let payment = Amount::from_cents(payment);
        let total = total_pending(&deductions);
        let plan = plan_consumption(&deductions, payment);

        prop_assert_eq!(plan.amount_deducted, payment.min(total));

        if let Some(partial) = plan.partial {
            prop_assert!(partial.remaining_amount.is_positive());
            prop_assert!(partial.remaining_amount < partial.previous_amount);
        }

        // Consumed ids form a prefix of the queue (FIFO).
        let prefix: Vec<Uuid> = deductions
            .iter()
            .take(plan.deductions_consumed.len())
            .map(|d| d.id)
            .collect();
        prop_assert_eq!(&plan.deductions_consumed, &prefix);
    }
}
