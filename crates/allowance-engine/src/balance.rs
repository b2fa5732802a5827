//! Balance reconstruction from the append-only transaction log.
//!
//! All views replay transactions in ledger order: `created_at` first, then
//! insertion sequence, so same-second entries never swap places.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::model::{Transaction, TransactionId};
use crate::money::Amount;
use crate::tz::local_date;

/// Closing balance of one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyBalance {
    pub date: NaiveDate,
    pub balance: Amount,
}

/// Balance immediately after a transaction.
///
/// The leading event of every series is synthetic: `transaction_id` is `None`,
/// `amount` is zero and `balance` is what the child held before the series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceEvent {
    pub transaction_id: Option<TransactionId>,
    pub at: DateTime<Utc>,
    pub amount: Amount,
    pub balance: Amount,
    pub description: Option<String>,
    pub is_recurring: bool,
}

impl BalanceEvent {
    fn opening(at: DateTime<Utc>, balance: Amount) -> Self {
        Self {
            transaction_id: None,
            at,
            amount: Amount::ZERO,
            balance,
            description: None,
            is_recurring: false,
        }
    }

    fn after(transaction: &Transaction, balance: Amount) -> Self {
        Self {
            transaction_id: Some(transaction.id),
            at: transaction.created_at,
            amount: transaction.amount,
            balance,
            description: transaction.description.clone(),
            is_recurring: transaction.is_recurring,
        }
    }
}

fn ordered(transactions: &[Transaction]) -> Vec<&Transaction> {
    let mut ordered: Vec<&Transaction> = transactions.iter().collect();
    ordered.sort_by_key(|t| t.order_key());
    ordered
}

pub fn child_balance(transactions: &[Transaction]) -> Amount {
    transactions.iter().map(|t| t.amount).sum()
}

/// Start of a `window_days` window ending at `now`; `0` means since the first transaction.
fn window_start(
    ordered: &[&Transaction],
    window_days: u32,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if window_days == 0 {
        ordered.first().map(|t| t.created_at)
    } else {
        Some(now - Duration::days(i64::from(window_days)))
    }
}

/// One closing balance per calendar day (in `tz`) from the window start through today.
///
/// Days without transactions carry the previous balance forward. Empty when
/// `window_days == 0` and the child has no transactions.
pub fn balance_history(
    transactions: &[Transaction],
    window_days: u32,
    now: DateTime<Utc>,
    tz: Tz,
) -> Vec<DailyBalance> {
    let ordered = ordered(transactions);
    let Some(start) = window_start(&ordered, window_days, now) else {
        return Vec::new();
    };

    let mut running: Amount = ordered
        .iter()
        .filter(|t| t.created_at < start)
        .map(|t| t.amount)
        .sum();
    let mut in_window = ordered.iter().filter(|t| t.created_at >= start).peekable();

    let last_day = local_date(now, tz);
    let mut history = Vec::new();
    let mut day = local_date(start, tz);
    while day <= last_day {
        while let Some(t) = in_window.peek() {
            if local_date(t.created_at, tz) > day {
                break;
            }
            running += t.amount;
            in_window.next();
        }
        history.push(DailyBalance {
            date: day,
            balance: running,
        });
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    history
}

/// Per-transaction balances for a `window_days` window ending at `now`.
///
/// Starts with an opening event at the window start carrying the balance
/// before it. `window_days == 0` covers all time; a child with no
/// transactions then yields nothing.
pub fn balance_events(
    transactions: &[Transaction],
    window_days: u32,
    now: DateTime<Utc>,
) -> Vec<BalanceEvent> {
    let ordered = ordered(transactions);
    let Some(start) = window_start(&ordered, window_days, now) else {
        return Vec::new();
    };

    let mut running: Amount = ordered
        .iter()
        .filter(|t| t.created_at < start)
        .map(|t| t.amount)
        .sum();

    let mut events = vec![BalanceEvent::opening(start, running)];
    for t in ordered.iter().filter(|t| t.created_at >= start) {
        running += t.amount;
        events.push(BalanceEvent::after(t, running));
    }
    events
}

/// Per-transaction balances for the most recent `count` transactions (all when `0`).
pub fn balance_events_by_count(transactions: &[Transaction], count: usize) -> Vec<BalanceEvent> {
    let ordered = ordered(transactions);
    let Some(first) = ordered.first() else {
        return Vec::new();
    };

    let skip = if count == 0 {
        0
    } else {
        ordered.len().saturating_sub(count)
    };
    let (before, selected) = ordered.split_at(skip);

    let mut running: Amount = before.iter().map(|t| t.amount).sum();
    let opening_at = selected.first().unwrap_or(first).created_at;

    let mut events = Vec::with_capacity(selected.len() + 1);
    events.push(BalanceEvent::opening(opening_at, running));
    for t in selected {
        running += t.amount;
        events.push(BalanceEvent::after(t, running));
    }
    events
}

/// The latest `limit` transactions, newest first (`0` for all).
pub fn recent_transactions(transactions: &[Transaction], limit: usize) -> Vec<Transaction> {
    let mut ordered = ordered(transactions);
    ordered.reverse();
    let take = if limit == 0 { ordered.len() } else { limit };
    ordered.into_iter().take(take).cloned().collect()
}
