//! Progressive maintenance-margin tiers.
//!
//! A [`MarginTierTable`] is validated once at construction and never mutated afterwards.
//! Updates from the exchange produce a new table (see [`TierTableHistory`](crate::history::TierTableHistory)).

use crate::error::TierError;
use derive_more::Constructor;
use itertools::Itertools;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Maximum allowed difference between adjacent tiers' margin at their shared boundary.
pub const CONTINUITY_TOLERANCE: Decimal = dec!(0.01);

/// One progressive-margin bracket covering notional in `[min_notional, max_notional)`.
#[derive(Clone, PartialEq, Eq, Debug, Constructor, Deserialize, Serialize)]
pub struct MarginTier {
    pub min_notional: Decimal,
    /// Exclusive upper bound. `None` marks the final, unbounded tier.
    pub max_notional: Option<Decimal>,
    pub margin_rate: Decimal,
    pub maintenance_amount: Decimal,
}

impl MarginTier {
    /// Maintenance margin required for `notional` under this tier:
    /// `notional × margin_rate − maintenance_amount`.
    pub fn margin(&self, notional: Decimal) -> Decimal {
        notional * self.margin_rate - self.maintenance_amount
    }

    pub fn contains(&self, notional: Decimal) -> bool {
        notional >= self.min_notional && self.max_notional.is_none_or(|max| notional < max)
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_notional.is_none()
    }
}

/// Validated, immutable set of margin tiers for one symbol.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(try_from = "RawMarginTierTable")]
pub struct MarginTierTable {
    version: String,
    source: String,
    tiers: Vec<MarginTier>,
}

/// Unvalidated wire form of a [`MarginTierTable`].
#[derive(Deserialize)]
struct RawMarginTierTable {
    version: String,
    source: String,
    tiers: Vec<MarginTier>,
}

impl TryFrom<RawMarginTierTable> for MarginTierTable {
    type Error = TierError;

    fn try_from(raw: RawMarginTierTable) -> Result<Self, Self::Error> {
        Self::new(raw.version, raw.source, raw.tiers)
    }
}

impl MarginTierTable {
    /// Construct a table, failing fast on any gap, ordering, rate or continuity violation.
    pub fn new<V, S>(version: V, source: S, tiers: Vec<MarginTier>) -> Result<Self, TierError>
    where
        V: Into<String>,
        S: Into<String>,
    {
        validate(&tiers)?;
        Ok(Self {
            version: version.into(),
            source: source.into(),
            tiers,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn tiers(&self) -> &[MarginTier] {
        &self.tiers
    }

    /// Find the tier covering `notional` by ascending linear scan.
    ///
    /// Tier tables hold a handful of brackets, so a scan beats a binary search here.
    /// Returns `None` only for negative notional.
    pub fn tier_for(&self, notional: Decimal) -> Option<&MarginTier> {
        self.tiers.iter().find(|tier| tier.contains(notional))
    }

    /// Maintenance margin for `notional` under the covering tier.
    pub fn margin(&self, notional: Decimal) -> Option<Decimal> {
        self.tier_for(notional).map(|tier| tier.margin(notional))
    }

    /// Binance USDⓈ-M BTCUSDT maintenance margin brackets.
    pub fn binance_btcusdt() -> Self {
        let bracket = |min: Decimal, max: Option<Decimal>, rate: Decimal, amount: Decimal| {
            MarginTier::new(min, max, rate, amount)
        };

        Self {
            version: "binance-btcusdt-2024".to_string(),
            source: "binance".to_string(),
            tiers: vec![
                bracket(dec!(0), Some(dec!(50000)), dec!(0.004), dec!(0)),
                bracket(dec!(50000), Some(dec!(500000)), dec!(0.005), dec!(50)),
                bracket(dec!(500000), Some(dec!(8000000)), dec!(0.01), dec!(2550)),
                bracket(dec!(8000000), Some(dec!(50000000)), dec!(0.025), dec!(122550)),
                bracket(dec!(50000000), Some(dec!(80000000)), dec!(0.05), dec!(1372550)),
                bracket(dec!(80000000), Some(dec!(100000000)), dec!(0.1), dec!(5372550)),
                bracket(dec!(100000000), Some(dec!(200000000)), dec!(0.125), dec!(7872550)),
                bracket(dec!(200000000), Some(dec!(300000000)), dec!(0.15), dec!(12872550)),
                bracket(dec!(300000000), Some(dec!(500000000)), dec!(0.25), dec!(42872550)),
                bracket(dec!(500000000), None, dec!(0.5), dec!(167872550)),
            ],
        }
    }
}

fn validate(tiers: &[MarginTier]) -> Result<(), TierError> {
    let first = tiers.first().ok_or(TierError::Empty)?;
    if !first.min_notional.is_zero() {
        return Err(TierError::FirstTierNotZero(first.min_notional));
    }
    // A positive base deduction would make margin negative for small notional
    if first.maintenance_amount > Decimal::ZERO {
        return Err(TierError::FirstTierMaintenanceAmount(first.maintenance_amount));
    }

    let last_index = tiers.len() - 1;
    for (index, tier) in tiers.iter().enumerate() {
        if tier.margin_rate <= Decimal::ZERO || tier.margin_rate > Decimal::ONE {
            return Err(TierError::InvalidMarginRate {
                index,
                rate: tier.margin_rate,
            });
        }
        if tier.maintenance_amount < Decimal::ZERO {
            return Err(TierError::NegativeMaintenanceAmount {
                index,
                amount: tier.maintenance_amount,
            });
        }
        match tier.max_notional {
            Some(max) if index == last_index => return Err(TierError::BoundedFinalTier(max)),
            Some(max) if tier.min_notional >= max => {
                return Err(TierError::EmptyRange {
                    index,
                    min: tier.min_notional,
                    max,
                });
            }
            None if index != last_index => return Err(TierError::UnboundedInnerTier { index }),
            _ => {}
        }
    }

    for ((index, tier), (next, upper)) in tiers.iter().enumerate().tuple_windows() {
        // Inner tiers are bounded, checked above
        let boundary = tier.max_notional.unwrap_or(upper.min_notional);
        if boundary != upper.min_notional {
            return Err(TierError::Gap {
                index,
                next,
                max: boundary,
                next_min: upper.min_notional,
            });
        }
        if upper.margin_rate < tier.margin_rate {
            return Err(TierError::NonMonotonicRate {
                index,
                next,
                rate: tier.margin_rate,
                next_rate: upper.margin_rate,
            });
        }

        let lower_margin = tier.margin(boundary);
        let upper_margin = upper.margin(boundary);
        if (lower_margin - upper_margin).abs() >= CONTINUITY_TOLERANCE {
            return Err(TierError::Discontinuity {
                boundary,
                lower: lower_margin,
                upper: upper_margin,
            });
        }
    }

    Ok(())
}
