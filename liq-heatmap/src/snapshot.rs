//! Price-bucketed liquidation density and the per-tick [`HeatmapSnapshot`] output.

use crate::{
    error::ConfigError,
    market::{Side, Timestamp},
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Smallest accepted bucket width. Keeps `price / size` within `Decimal` range.
pub const MIN_BUCKET_SIZE: Decimal = dec!(0.00000001);

/// Width of a liquidation bucket in quote currency. Always strictly positive.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct BucketSize(Decimal);

impl BucketSize {
    pub fn new(size: Decimal) -> Result<Self, ConfigError> {
        if size <= Decimal::ZERO {
            return Err(ConfigError::NonPositive {
                name: "bucket_size".to_string(),
                value: size,
            });
        }
        if size < MIN_BUCKET_SIZE {
            return Err(ConfigError::BucketSizeTooSmall {
                value: size,
                min: MIN_BUCKET_SIZE,
            });
        }
        Ok(Self(size))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Lower edge of the bucket containing `price`: `floor(price / size) × size`.
    ///
    /// A price too large to divide by the bucket width is its own bucket.
    pub fn floor(&self, price: Decimal) -> Decimal {
        price
            .checked_div(self.0)
            .and_then(|buckets| buckets.floor().checked_mul(self.0))
            .unwrap_or(price)
            .normalize()
    }
}

impl Default for BucketSize {
    fn default() -> Self {
        Self(Decimal::ONE_HUNDRED)
    }
}

impl TryFrom<Decimal> for BucketSize {
    type Error = ConfigError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BucketSize> for Decimal {
    fn from(value: BucketSize) -> Self {
        value.0
    }
}

/// Liquidation notional resting in one price bucket.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct BucketDensity {
    pub long_density: Decimal,
    pub short_density: Decimal,
}

impl BucketDensity {
    pub fn total(&self) -> Decimal {
        self.long_density + self.short_density
    }

    fn add(&mut self, side: Side, notional: Decimal) {
        match side {
            Side::Long => self.long_density += notional,
            Side::Short => self.short_density += notional,
        }
    }
}

/// Ordered `bucket lower edge -> density` histogram.
pub type DensityMap = BTreeMap<Decimal, BucketDensity>;

/// Aggregate `(liq_price, notional, side)` triples into a bucketed density histogram.
pub fn aggregate<I>(positions: I, bucket_size: BucketSize) -> DensityMap
where
    I: IntoIterator<Item = (Decimal, Decimal, Side)>,
{
    positions
        .into_iter()
        .fold(DensityMap::new(), |mut buckets, (liq_price, notional, side)| {
            buckets
                .entry(bucket_size.floor(liq_price))
                .or_default()
                .add(side, notional);
            buckets
        })
}

/// Full bucketed density state emitted by the engine after processing one candle.
#[derive(Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
pub struct HeatmapSnapshot {
    pub timestamp: Timestamp,
    pub buckets: DensityMap,
    pub positions_created: u32,
    pub positions_consumed: u32,
}

impl HeatmapSnapshot {
    pub fn total_long(&self) -> Decimal {
        self.buckets.values().map(|bucket| bucket.long_density).sum()
    }

    pub fn total_short(&self) -> Decimal {
        self.buckets.values().map(|bucket| bucket.short_density).sum()
    }

    /// Bucket holding the most combined long and short notional.
    pub fn densest_bucket(&self) -> Option<(Decimal, BucketDensity)> {
        self.buckets
            .iter()
            .max_by(|(_, a), (_, b)| a.total().cmp(&b.total()))
            .map(|(price, density)| (*price, *density))
    }
}
