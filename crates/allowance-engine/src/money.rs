//! Fixed-point money amounts and currency display.
//!
//! Amounts are stored as a signed count of minor units (cents). Arithmetic on
//! [`Amount`] is exact; floating point never touches ledger state.
//!
//! A single ledger entry is capped at [`Amount::MAX_ENTRY`]. Operators saturate
//! at the `i64` bounds instead of panicking; totals that decide whether money
//! moves go through [`Amount::try_sum`], which reports overflow as an error.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// A signed amount of money in minor currency units.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Largest magnitude a single transaction, deduction or rule may carry:
    /// one billion major units.
    pub const MAX_ENTRY: Amount = Amount(100_000_000_000);

    pub const fn from_cents(cents: i64) -> Self {
        Amount(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn abs(self) -> Self {
        Amount(self.0.saturating_abs())
    }

    pub const fn within_entry_limit(self) -> bool {
        self.0.unsigned_abs() <= Self::MAX_ENTRY.0.unsigned_abs()
    }

    pub const fn checked_add(self, rhs: Amount) -> Option<Amount> {
        match self.0.checked_add(rhs.0) {
            Some(v) => Some(Amount(v)),
            None => None,
        }
    }

    pub const fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        match self.0.checked_sub(rhs.0) {
            Some(v) => Some(Amount(v)),
            None => None,
        }
    }

    /// Sum that fails with `Validation` instead of leaving the `i64` range.
    pub fn try_sum<I: IntoIterator<Item = Amount>>(amounts: I) -> Result<Amount, LedgerError> {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, Amount::checked_add)
            .ok_or_else(|| LedgerError::Validation("amount total is out of range".to_string()))
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_sub(rhs.0))
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        *self = *self + rhs;
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Amount) {
        *self = *self - rhs;
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(self.0.saturating_neg())
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Amount {
        iter.copied().sum()
    }
}

impl fmt::Display for Amount {
    /// Renders as a plain decimal with two fractional digits, e.g. `-1.50`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl FromStr for Amount {
    type Err = LedgerError;

    /// Parses user input such as `5`, `12.5`, `-0.75`. At most two fractional
    /// digits, and no larger than [`Amount::MAX_ENTRY`] in magnitude.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LedgerError::Validation(format!("invalid amount: '{}'", s));

        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };

        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.len() > 2 || !whole.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        if !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole_value: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let frac_value: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };

        let cents = whole_value
            .checked_mul(100)
            .and_then(|w| w.checked_add(frac_value))
            .ok_or_else(invalid)?;

        let amount = Amount(if negative { -cents } else { cents });
        if !amount.within_entry_limit() {
            return Err(LedgerError::Validation(format!(
                "invalid amount: '{}' exceeds the maximum of {}",
                s,
                Amount::MAX_ENTRY
            )));
        }
        Ok(amount)
    }
}

/// A supported display currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Currency {
    pub code: &'static str,
    pub symbol: &'static str,
    pub name: &'static str,
}

pub const CURRENCIES: &[Currency] = &[
    Currency { code: "EUR", symbol: "\u{20ac}", name: "Euro" },
    Currency { code: "GBP", symbol: "\u{a3}", name: "British Pound" },
    Currency { code: "USD", symbol: "$", name: "US Dollar" },
    Currency { code: "SEK", symbol: "kr", name: "Swedish Krona" },
    Currency { code: "NOK", symbol: "kr", name: "Norwegian Krone" },
    Currency { code: "DKK", symbol: "kr", name: "Danish Krone" },
    Currency { code: "CHF", symbol: "CHF", name: "Swiss Franc" },
    Currency { code: "AUD", symbol: "A$", name: "Australian Dollar" },
    Currency { code: "CAD", symbol: "C$", name: "Canadian Dollar" },
    Currency { code: "JPY", symbol: "\u{a5}", name: "Japanese Yen" },
    Currency { code: "PLN", symbol: "z\u{142}", name: "Polish Zloty" },
    Currency { code: "CZK", symbol: "K\u{10d}", name: "Czech Koruna" },
];

pub fn find_currency(code: &str) -> Option<&'static Currency> {
    CURRENCIES.iter().find(|c| c.code == code)
}

/// Symbol for a currency code; unknown codes render as the code itself.
pub fn currency_symbol(code: &str) -> &str {
    match find_currency(code) {
        Some(currency) => currency.symbol,
        None => code,
    }
}

/// Format an amount for display, e.g. `-€1.50`.
pub fn format_money(amount: Amount, currency_code: &str) -> String {
    let sign = if amount.is_negative() { "-" } else { "" };
    format!("{}{}{}", sign, currency_symbol(currency_code), amount.abs())
}
