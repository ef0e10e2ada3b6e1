//! Bar timeframes.
//!
//! Only a fixed set of (length, unit) combinations is supported:
//! 1/5/15/30 min, 1/4 hour, 1 day, 1 week, 1 month.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeframeError {
    #[error("unknown timeframe unit '{0}' (expected min, hour, day, week or month)")]
    UnknownUnit(String),

    #[error("timeframe not supported: '{length}{unit}'")]
    Unsupported { length: u32, unit: TimeframeUnit },
}

/// Unit of a timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeframeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl TimeframeUnit {
    /// Short token used in file names and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Second => "sec",
            Self::Minute => "min",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// Lengths this unit may be combined with.
    fn supported_lengths(&self) -> &'static [u32] {
        match self {
            Self::Second => &[],
            Self::Minute => &[1, 5, 15, 30],
            Self::Hour => &[1, 4],
            Self::Day | Self::Week | Self::Month => &[1],
        }
    }
}

impl fmt::Display for TimeframeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeframeUnit {
    type Err = TimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sec" | "s" | "second" => Ok(Self::Second),
            "min" | "m" | "minute" => Ok(Self::Minute),
            "hour" | "h" => Ok(Self::Hour),
            "day" | "d" => Ok(Self::Day),
            "week" | "w" => Ok(Self::Week),
            "month" | "mo" => Ok(Self::Month),
            other => Err(TimeframeError::UnknownUnit(other.to_string())),
        }
    }
}

/// A validated bar interval such as `15min` or `1day`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timeframe {
    length: u32,
    unit: TimeframeUnit,
}

impl Timeframe {
    pub fn new(length: u32, unit: TimeframeUnit) -> Result<Self, TimeframeError> {
        if !unit.supported_lengths().contains(&length) {
            return Err(TimeframeError::Unsupported { length, unit });
        }
        Ok(Self { length, unit })
    }

    pub fn daily() -> Self {
        Self {
            length: 1,
            unit: TimeframeUnit::Day,
        }
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn unit(&self) -> TimeframeUnit {
        self.unit
    }

    /// Nominal span of one bar. Months have irregular lengths, so every month counts as 31 days.
    pub fn duration(&self) -> Duration {
        let n = i64::from(self.length);
        match self.unit {
            TimeframeUnit::Second => Duration::seconds(n),
            TimeframeUnit::Minute => Duration::minutes(n),
            TimeframeUnit::Hour => Duration::hours(n),
            TimeframeUnit::Day => Duration::days(n),
            TimeframeUnit::Week => Duration::weeks(n),
            TimeframeUnit::Month => Duration::days(31),
        }
    }

    pub fn is_intraday(&self) -> bool {
        matches!(
            self.unit,
            TimeframeUnit::Second | TimeframeUnit::Minute | TimeframeUnit::Hour
        )
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.length, self.unit)
    }
}
