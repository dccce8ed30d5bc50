//! Expiry Computation
//!
//! Turns relative offsets ("120" minutes, "2.months") into absolute
//! wall-clock timestamps.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};
use serde_json::Value;

use crate::error::{Result, StoreError};

/// Calendar unit an expiry offset is counted in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Quarters,
    Years,
}

impl TimeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Milliseconds => "milliseconds",
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
            Self::Weeks => "weeks",
            Self::Months => "months",
            Self::Quarters => "quarters",
            Self::Years => "years",
        }
    }
}

impl FromStr for TimeUnit {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        // "M" and "m" differ only by case, so shorthands are matched first
        let unit = match s {
            "ms" => Self::Milliseconds,
            "s" => Self::Seconds,
            "m" => Self::Minutes,
            "h" => Self::Hours,
            "d" => Self::Days,
            "w" => Self::Weeks,
            "M" => Self::Months,
            "Q" => Self::Quarters,
            "y" => Self::Years,
            _ => match s.to_ascii_lowercase().as_str() {
                "millisecond" | "milliseconds" => Self::Milliseconds,
                "second" | "seconds" => Self::Seconds,
                "minute" | "minutes" => Self::Minutes,
                "hour" | "hours" => Self::Hours,
                "day" | "days" => Self::Days,
                "week" | "weeks" => Self::Weeks,
                "month" | "months" => Self::Months,
                "quarter" | "quarters" => Self::Quarters,
                "year" | "years" => Self::Years,
                _ => return Err(StoreError::InvalidExpiry(format!("unknown unit `{}`", s))),
            },
        };
        Ok(unit)
    }
}

/// Relative expiry offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireAfter {
    /// Plain count of minutes
    Minutes(i64),
    /// `<amount>.<unit>`, e.g. `2.months`
    Span { amount: i64, unit: TimeUnit },
}

impl ExpireAfter {
    pub fn span(amount: i64, unit: TimeUnit) -> Self {
        Self::Span { amount, unit }
    }

    /// Interpret a JSON value: numbers are minutes, strings are spans.
    ///
    /// Returns `None` for JS-falsy values (null, false, 0, ""), which
    /// never attach an expiry.
    pub fn from_json(value: &Value) -> Result<Option<Self>> {
        match value {
            Value::Null | Value::Bool(false) => Ok(None),
            Value::Number(n) => {
                if let Some(minutes) = n.as_i64() {
                    return Ok((minutes != 0).then_some(Self::Minutes(minutes)));
                }
                let minutes = n
                    .as_f64()
                    .ok_or_else(|| StoreError::InvalidExpiry(n.to_string()))?;
                if minutes == 0.0 {
                    return Ok(None);
                }
                let millis = (minutes * 60_000.0).round();
                if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
                    return Err(StoreError::ExpiryOutOfRange);
                }
                Ok(Some(Self::span(millis as i64, TimeUnit::Milliseconds)))
            }
            Value::String(s) if s.is_empty() => Ok(None),
            Value::String(s) => s.parse().map(Some),
            other => Err(StoreError::InvalidExpiry(other.to_string())),
        }
    }
}

impl From<i64> for ExpireAfter {
    fn from(minutes: i64) -> Self {
        Self::Minutes(minutes)
    }
}

impl FromStr for ExpireAfter {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        let (amount, unit) = s
            .split_once('.')
            .ok_or_else(|| StoreError::InvalidExpiry(format!("expected `<int>.<unit>`, got `{}`", s)))?;
        let amount = amount
            .parse::<i64>()
            .map_err(|_| StoreError::InvalidExpiry(format!("non-numeric amount in `{}`", s)))?;
        Ok(Self::span(amount, unit.parse()?))
    }
}

impl fmt::Display for ExpireAfter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minutes(m) => write!(f, "{}", m),
            Self::Span { amount, unit } => write!(f, "{}.{}", amount, unit.as_str()),
        }
    }
}

/// Absolute expiry timestamp for `expire_after` counted from `now`
pub fn compute_expiry(now: DateTime<Utc>, expire_after: ExpireAfter) -> Result<DateTime<Utc>> {
    let (amount, unit) = match expire_after {
        ExpireAfter::Minutes(m) => (m, TimeUnit::Minutes),
        ExpireAfter::Span { amount, unit } => (amount, unit),
    };

    let fixed = |delta: Option<Duration>| {
        delta
            .and_then(|d| now.checked_add_signed(d))
            .ok_or(StoreError::ExpiryOutOfRange)
    };

    match unit {
        TimeUnit::Milliseconds => fixed(Duration::try_milliseconds(amount)),
        TimeUnit::Seconds => fixed(Duration::try_seconds(amount)),
        TimeUnit::Minutes => fixed(Duration::try_minutes(amount)),
        TimeUnit::Hours => fixed(Duration::try_hours(amount)),
        TimeUnit::Days => fixed(Duration::try_days(amount)),
        TimeUnit::Weeks => fixed(Duration::try_weeks(amount)),
        TimeUnit::Months => add_months(now, Some(amount)),
        TimeUnit::Quarters => add_months(now, amount.checked_mul(3)),
        TimeUnit::Years => add_months(now, amount.checked_mul(12)),
    }
}

/// Calendar month arithmetic, clamped to the end of shorter months
fn add_months(now: DateTime<Utc>, months: Option<i64>) -> Result<DateTime<Utc>> {
    let months = months.ok_or(StoreError::ExpiryOutOfRange)?;
    let magnitude = u32::try_from(months.unsigned_abs()).map_err(|_| StoreError::ExpiryOutOfRange)?;
    let shifted = if months >= 0 {
        now.checked_add_months(Months::new(magnitude))
    } else {
        now.checked_sub_months(Months::new(magnitude))
    };
    shifted.ok_or(StoreError::ExpiryOutOfRange)
}
