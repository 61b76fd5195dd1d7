//! Active synthetic positions indexed by quantized liquidation price.

use crate::{
    config::DEFAULT_DECAY_EPSILON,
    market::{Candle, Side, Timestamp},
    snapshot::{self, BucketSize, DensityMap},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One synthetic leveraged position reconstructed from open interest growth.
#[derive(Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
pub struct LiquidationPosition {
    pub entry_price: Decimal,
    pub liq_price: Decimal,
    pub notional: Decimal,
    pub side: Side,
    pub leverage: u32,
    pub created_at: Timestamp,
    pub consumed_at: Option<Timestamp>,
}

impl LiquidationPosition {
    /// Inclusive test of whether `candle`'s range reaches this position's liquidation price.
    pub fn is_liquidated_by(&self, candle: &Candle) -> bool {
        match self.side {
            Side::Long => self.liq_price >= candle.low,
            Side::Short => self.liq_price <= candle.high,
        }
    }
}

type Index = BTreeMap<Decimal, Vec<LiquidationPosition>>;

/// Owns every active synthetic position for one symbol.
///
/// Positions live in per-side ordered maps keyed by the lower edge of their liquidation
/// price bucket, so a candle only has to visit the buckets its range reaches.
#[derive(Clone, Debug)]
pub struct PositionBook {
    bucket_size: BucketSize,
    decay_epsilon: Decimal,
    longs: Index,
    shorts: Index,
    total_notional: Decimal,
    len: usize,
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new(BucketSize::default(), DEFAULT_DECAY_EPSILON)
    }
}

impl PositionBook {
    pub fn new(bucket_size: BucketSize, decay_epsilon: Decimal) -> Self {
        Self {
            bucket_size,
            decay_epsilon,
            longs: Index::new(),
            shorts: Index::new(),
            total_notional: Decimal::ZERO,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sum of all active positions' notional.
    pub fn total_notional(&self) -> Decimal {
        self.total_notional
    }

    pub fn iter(&self) -> impl Iterator<Item = &LiquidationPosition> {
        self.longs
            .values()
            .chain(self.shorts.values())
            .flatten()
    }

    pub fn insert(&mut self, position: LiquidationPosition) {
        let key = self.bucket_size.floor(position.liq_price);
        self.total_notional += position.notional;
        self.len += 1;

        self.index_mut(position.side)
            .entry(key)
            .or_default()
            .push(position);
    }

    /// Remove and return every active position whose liquidation price lies within the candle's
    /// reach: longs with `liq_price >= low`, shorts with `liq_price <= high`.
    ///
    /// Returned positions carry `consumed_at = candle.open_time`. Order is unspecified.
    pub fn consume(&mut self, candle: &Candle) -> Vec<LiquidationPosition> {
        let mut consumed = Vec::new();

        // Longs: every bucket at or above the one containing `low` may be reached
        let low_key = self.bucket_size.floor(candle.low);
        let reached = self.longs.split_off(&low_key);
        self.drain_reached(Side::Long, reached, candle, &mut consumed);

        // Shorts: every bucket at or below the one containing `high` may be reached
        let high_key = self.bucket_size.floor(candle.high);
        let mut above = self.shorts.split_off(&high_key);
        let boundary = above.remove(&high_key);
        let mut reached = std::mem::replace(&mut self.shorts, above);
        if let Some(positions) = boundary {
            reached.insert(high_key, positions);
        }
        self.drain_reached(Side::Short, reached, candle, &mut consumed);

        for position in &mut consumed {
            position.consumed_at = Some(candle.open_time);
            self.total_notional -= position.notional;
        }
        self.len -= consumed.len();

        consumed
    }

    /// Spread `volume_to_remove` of voluntary closes proportionally over all active positions.
    ///
    /// `ratio = min(volume_to_remove / total_notional, 1)`; every notional is scaled by
    /// `1 − ratio` and positions left below the decay epsilon are dropped. A non-positive
    /// volume or an empty book is a no-op. Returns the number of positions dropped.
    pub fn decay(&mut self, volume_to_remove: Decimal) -> usize {
        if volume_to_remove <= Decimal::ZERO || self.total_notional <= Decimal::ZERO {
            return 0;
        }

        let ratio = (volume_to_remove / self.total_notional).min(Decimal::ONE);
        let retained = Decimal::ONE - ratio;
        let epsilon = self.decay_epsilon;

        let mut total = Decimal::ZERO;
        let mut remaining = 0;
        for index in [&mut self.longs, &mut self.shorts] {
            index.retain(|_, positions| {
                positions.retain_mut(|position| {
                    position.notional *= retained;
                    position.notional >= epsilon && !position.notional.is_zero()
                });
                total += positions.iter().map(|position| position.notional).sum::<Decimal>();
                remaining += positions.len();
                !positions.is_empty()
            });
        }

        let dropped = self.len - remaining;
        self.total_notional = total;
        self.len = remaining;
        dropped
    }

    /// Aggregate active positions into a `(long_density, short_density)` histogram.
    pub fn snapshot(&self, bucket_size: BucketSize) -> DensityMap {
        snapshot::aggregate(
            self.iter()
                .map(|position| (position.liq_price, position.notional, position.side)),
            bucket_size,
        )
    }

    fn index_mut(&mut self, side: Side) -> &mut Index {
        match side {
            Side::Long => &mut self.longs,
            Side::Short => &mut self.shorts,
        }
    }

    /// Split `reached` buckets into liquidated positions (pushed to `consumed`) and survivors,
    /// which are re-indexed. Only the boundary bucket normally holds survivors.
    fn drain_reached(
        &mut self,
        side: Side,
        reached: Index,
        candle: &Candle,
        consumed: &mut Vec<LiquidationPosition>,
    ) {
        for (key, positions) in reached {
            let (hit, survivors): (Vec<_>, Vec<_>) = positions
                .into_iter()
                .partition(|position| position.is_liquidated_by(candle));

            consumed.extend(hit);
            if !survivors.is_empty() {
                self.index_mut(side).insert(key, survivors);
            }
        }
    }
}
