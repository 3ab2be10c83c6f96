//! Cryptoperiods: how long a key may stay in use.
//!
//! Written as `<n>d`, `<n>m` or `<n>y`. Months count as 30 days and years
//! as 365, so a cryptoperiod is always a whole number of days.

use chrono::Duration;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::CryptoperiodError;

pub const DAYS_IN_MONTH: u32 = 30;
pub const DAYS_IN_YEAR: u32 = 365;
/// Upper bound: one hundred years.
pub const MAX_DAYS: u32 = 100 * DAYS_IN_YEAR;

/// A positive number of days, at most [`MAX_DAYS`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cryptoperiod(u32);

impl Cryptoperiod {
    pub fn from_days(days: u32) -> Result<Self, CryptoperiodError> {
        if days == 0 {
            return Err(CryptoperiodError::Zero);
        }
        if days > MAX_DAYS {
            return Err(CryptoperiodError::TooLong { days: days as u64 });
        }
        Ok(Self(days))
    }

    pub fn days(&self) -> u32 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::days(i64::from(self.0))
    }
}

impl FromStr for Cryptoperiod {
    type Err = CryptoperiodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().to_ascii_lowercase();
        let invalid = || CryptoperiodError::Format(s.to_string());

        let unit = trimmed.chars().last().ok_or_else(invalid)?;
        let digits = &trimmed[..trimmed.len() - unit.len_utf8()];
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        // Anything that does not fit in u64 is far past MAX_DAYS anyway.
        let value: u64 = digits.parse().map_err(|_| CryptoperiodError::TooLong { days: u64::MAX })?;

        let multiplier = match unit {
            'd' => 1,
            'm' => u64::from(DAYS_IN_MONTH),
            'y' => u64::from(DAYS_IN_YEAR),
            _ => return Err(invalid()),
        };
        let days = value.saturating_mul(multiplier);
        if days > u64::from(MAX_DAYS) {
            return Err(CryptoperiodError::TooLong { days });
        }
        Self::from_days(days as u32)
    }
}

impl fmt::Display for Cryptoperiod {
    /// Largest exact unit: `1y`, `6m`, otherwise days.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days = self.0;
        if days % DAYS_IN_YEAR == 0 {
            write!(f, "{}y", days / DAYS_IN_YEAR)
        } else if days % DAYS_IN_MONTH == 0 {
            write!(f, "{}m", days / DAYS_IN_MONTH)
        } else {
            write!(f, "{}d", days)
        }
    }
}

impl Serialize for Cryptoperiod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cryptoperiod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
