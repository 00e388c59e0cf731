//! Shared domain types: bars, timeframes and analysis subjects

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    #[inline]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    #[inline]
    pub fn body_top(&self) -> f64 {
        self.open.max(self.close)
    }

    #[inline]
    pub fn body_bottom(&self) -> f64 {
        self.open.min(self.close)
    }

    /// Close above open
    #[inline]
    pub fn is_up(&self) -> bool {
        self.close > self.open
    }

    /// Close below open
    #[inline]
    pub fn is_down(&self) -> bool {
        self.close < self.open
    }

    /// Checks the OHLC envelope and value domain. Returns the violated rule.
    pub fn validate(&self) -> Result<(), &'static str> {
        let values = [self.open, self.high, self.low, self.close, self.volume];
        if values.iter().any(|v| !v.is_finite()) {
            return Err("non-finite price or volume");
        }
        if self.volume < 0.0 {
            return Err("negative volume");
        }
        if self.high < self.body_top() {
            return Err("high below open/close");
        }
        if self.low > self.body_bottom() {
            return Err("low above open/close");
        }
        Ok(())
    }
}

/// Bar timeframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "30m")]
    Min30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
    #[serde(rename = "1w")]
    Week1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 8] = [
        Timeframe::Min1,
        Timeframe::Min5,
        Timeframe::Min15,
        Timeframe::Min30,
        Timeframe::Hour1,
        Timeframe::Hour4,
        Timeframe::Day1,
        Timeframe::Week1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Min1 => "1m",
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Min30 => "30m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour4 => "4h",
            Timeframe::Day1 => "1d",
            Timeframe::Week1 => "1w",
        }
    }

    /// Nominal spacing between consecutive bars
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::Min1 => Duration::minutes(1),
            Timeframe::Min5 => Duration::minutes(5),
            Timeframe::Min15 => Duration::minutes(15),
            Timeframe::Min30 => Duration::minutes(30),
            Timeframe::Hour1 => Duration::hours(1),
            Timeframe::Hour4 => Duration::hours(4),
            Timeframe::Day1 => Duration::days(1),
            Timeframe::Week1 => Duration::weeks(1),
        }
    }

    pub fn is_intraday(&self) -> bool {
        !matches!(self, Timeframe::Day1 | Timeframe::Week1)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.as_str() == wanted)
            .ok_or_else(|| format!("unknown timeframe '{}'", s))
    }
}

/// An instrument observed on one timeframe. Timeline state is keyed by this.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub instrument: String,
    pub timeframe: Timeframe,
}

impl Subject {
    pub fn new(instrument: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            instrument: instrument.into(),
            timeframe,
        }
    }

    /// Filesystem-safe key, e.g. `BTC-USDT@1h`
    pub fn storage_key(&self) -> String {
        let instrument: String = self
            .instrument
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        format!("{}@{}", instrument, self.timeframe)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.instrument, self.timeframe)
    }
}

impl FromStr for Subject {
    type Err = String;

    /// Parses `SYMBOL@TF`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (instrument, tf) = s
            .rsplit_once('@')
            .ok_or_else(|| format!("expected SYMBOL@TIMEFRAME, got '{}'", s))?;
        if instrument.trim().is_empty() {
            return Err(format!("missing instrument in '{}'", s));
        }
        Ok(Subject::new(instrument.trim(), tf.parse()?))
    }
}
