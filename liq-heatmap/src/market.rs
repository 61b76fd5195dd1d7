//! Externally supplied market inputs: candles, open interest observations and position side.

use chrono::{DateTime, Utc};
use derive_more::{Constructor, Display};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Timestamp type used throughout the engine.
pub type Timestamp = DateTime<Utc>;

/// Direction of a synthetic leveraged position.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    #[display("long")]
    Long,
    #[display("short")]
    Short,
}

impl Side {
    pub fn is_long(&self) -> bool {
        matches!(self, Side::Long)
    }

    pub fn is_short(&self) -> bool {
        matches!(self, Side::Short)
    }
}

/// OHLCV candle. Immutable once received from the ingestion layer.
#[derive(Clone, PartialEq, Eq, Debug, Constructor, Deserialize, Serialize)]
pub struct Candle {
    pub open_time: Timestamp,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Side implied by the candle body, `None` for a doji (`close == open`).
    pub fn direction(&self) -> Option<Side> {
        match self.close.cmp(&self.open) {
            std::cmp::Ordering::Greater => Some(Side::Long),
            std::cmp::Ordering::Less => Some(Side::Short),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Returns a description of the first structural problem with this candle, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.high < self.low {
            return Err(format!("high {} below low {}", self.high, self.low));
        }
        if self.open < self.low || self.open > self.high {
            return Err(format!(
                "open {} outside range [{}, {}]",
                self.open, self.low, self.high
            ));
        }
        if self.close < self.low || self.close > self.high {
            return Err(format!(
                "close {} outside range [{}, {}]",
                self.close, self.low, self.high
            ));
        }
        Ok(())
    }
}

/// Open interest reading aligned to a candle.
#[derive(Clone, PartialEq, Eq, Debug, Constructor, Deserialize, Serialize)]
pub struct OIObservation {
    pub timestamp: Timestamp,
    pub open_interest_value: Decimal,
    /// Tick-over-tick change in open interest notional. Missing deltas count as zero.
    #[serde(default)]
    pub delta: Option<Decimal>,
}

impl OIObservation {
    pub fn delta_or_zero(&self) -> Decimal {
        self.delta.unwrap_or(Decimal::ZERO)
    }
}
