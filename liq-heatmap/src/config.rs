//! Engine configuration: leverage distribution, bucket sizing, decay threshold and
//! the doji side-inference policy.
//!
//! Every value here is validated at construction so invalid settings never reach the
//! tick loop. [`HeatmapConfig::from_env`] overlays environment variables on the defaults.

use crate::{
    calculator::LiquidationModel,
    error::ConfigError,
    market::Side,
    snapshot::BucketSize,
};
use rust_decimal::{Decimal, prelude::FromPrimitive};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, str::FromStr};

/// Allowed deviation of a weight sum from exactly one.
pub const WEIGHT_SUM_TOLERANCE: Decimal = dec!(0.000001);

/// Default notional below which a decayed position is dropped ($0.01).
pub const DEFAULT_DECAY_EPSILON: Decimal = dec!(0.01);

/// Immutable distribution of newly opened notional across leverage tiers.
#[derive(Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
#[serde(try_from = "BTreeMap<u32, Decimal>", into = "BTreeMap<u32, Decimal>")]
pub struct LeverageWeights(Vec<(u32, Decimal)>);

impl LeverageWeights {
    /// Construct from `(leverage, weight)` pairs. Weights must lie in `[0, 1]` and sum to one.
    pub fn new<I>(weights: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (u32, Decimal)>,
    {
        let mut weights = weights.into_iter().collect::<Vec<_>>();
        if weights.is_empty() {
            return Err(ConfigError::WeightsEmpty);
        }

        weights.sort_by_key(|(leverage, _)| *leverage);

        let mut sum = Decimal::ZERO;
        let mut previous = None;
        for &(leverage, weight) in &weights {
            if leverage < 1 {
                return Err(ConfigError::InvalidLeverage(leverage));
            }
            if previous == Some(leverage) {
                return Err(ConfigError::DuplicateLeverage(leverage));
            }
            if weight < Decimal::ZERO || weight > Decimal::ONE {
                return Err(ConfigError::InvalidWeight { leverage, weight });
            }
            previous = Some(leverage);
            sum += weight;
        }

        if (sum - Decimal::ONE).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum(sum));
        }

        Ok(Self(weights))
    }

    /// Construct from floating point weights, as typically found in operator configuration.
    pub fn from_f64<I>(weights: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (u32, f64)>,
    {
        let weights = weights
            .into_iter()
            .map(|(leverage, weight)| {
                Decimal::from_f64(weight)
                    .map(|weight| (leverage, weight))
                    .ok_or_else(|| ConfigError::UnrepresentableWeight(weight.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(weights)
    }

    /// `(leverage, weight)` pairs in ascending leverage order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, Decimal)> + '_ {
        self.0.iter().copied()
    }

    /// Pairs that actually receive notional.
    pub fn active(&self) -> impl Iterator<Item = (u32, Decimal)> + '_ {
        self.iter().filter(|(_, weight)| !weight.is_zero())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for LeverageWeights {
    fn default() -> Self {
        Self(vec![
            (5, dec!(0.15)),
            (10, dec!(0.30)),
            (25, dec!(0.25)),
            (50, dec!(0.20)),
            (100, dec!(0.10)),
        ])
    }
}

impl TryFrom<BTreeMap<u32, Decimal>> for LeverageWeights {
    type Error = ConfigError;

    fn try_from(value: BTreeMap<u32, Decimal>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LeverageWeights> for BTreeMap<u32, Decimal> {
    fn from(value: LeverageWeights) -> Self {
        value.0.into_iter().collect()
    }
}

impl FromStr for LeverageWeights {
    type Err = ConfigError;

    /// Parse `"5:0.15,10:0.30,25:0.25,50:0.20,100:0.10"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let env_error = |reason: String| ConfigError::Env {
            key: "HEATMAP_LEVERAGE_WEIGHTS".to_string(),
            value: s.to_string(),
            reason,
        };

        let weights = s
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (leverage, weight) = entry
                    .split_once(':')
                    .ok_or_else(|| env_error(format!("expected leverage:weight, found {entry}")))?;
                let leverage = leverage
                    .trim()
                    .trim_end_matches(['x', 'X'])
                    .parse::<u32>()
                    .map_err(|error| env_error(error.to_string()))?;
                let weight = Decimal::from_str(weight.trim())
                    .map_err(|error| env_error(error.to_string()))?;
                Ok((leverage, weight))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Self::new(weights)
    }
}

/// Side assigned to positions created on a doji candle (`close == open`).
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DojiPolicy {
    /// Create nothing for the tick. May understate density during flat, high OI growth periods.
    #[default]
    Skip,
    /// Attribute doji OI growth to longs.
    Long,
    /// Attribute doji OI growth to shorts.
    Short,
}

impl DojiPolicy {
    pub fn side(&self) -> Option<Side> {
        match self {
            DojiPolicy::Skip => None,
            DojiPolicy::Long => Some(Side::Long),
            DojiPolicy::Short => Some(Side::Short),
        }
    }
}

impl FromStr for DojiPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(DojiPolicy::Skip),
            "long" => Ok(DojiPolicy::Long),
            "short" => Ok(DojiPolicy::Short),
            other => Err(ConfigError::Env {
                key: "HEATMAP_DOJI_POLICY".to_string(),
                value: other.to_string(),
                reason: "expected one of skip, long, short".to_string(),
            }),
        }
    }
}

/// Complete configuration of one [`HeatmapEngine`](crate::engine::HeatmapEngine) run.
#[derive(Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct HeatmapConfig {
    /// Width of output snapshot buckets.
    pub bucket_size: BucketSize,
    /// Width of the PositionBook's internal consumption index.
    pub index_bucket_size: BucketSize,
    pub leverage_weights: LeverageWeights,
    /// Positions whose notional decays below this are dropped.
    pub decay_epsilon: Decimal,
    pub doji_policy: DojiPolicy,
    pub model: LiquidationModel,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            bucket_size: BucketSize::default(),
            index_bucket_size: BucketSize::default(),
            leverage_weights: LeverageWeights::default(),
            decay_epsilon: DEFAULT_DECAY_EPSILON,
            doji_policy: DojiPolicy::default(),
            model: LiquidationModel::default(),
        }
    }
}

impl HeatmapConfig {
    /// Defaults overlaid with `HEATMAP_*` environment variables.
    ///
    /// - `HEATMAP_BUCKET_SIZE` (default: 100)
    /// - `HEATMAP_INDEX_BUCKET_SIZE` (default: 100)
    /// - `HEATMAP_LEVERAGE_WEIGHTS` (default: `5:0.15,10:0.30,25:0.25,50:0.20,100:0.10`)
    /// - `HEATMAP_DECAY_EPSILON` (default: 0.01)
    /// - `HEATMAP_DOJI_POLICY` (default: skip)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values resolved by `lookup`, keyed by env var name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(size) = parse_env(&lookup, "HEATMAP_BUCKET_SIZE")? {
            config.bucket_size = BucketSize::new(size)?;
        }
        if let Some(size) = parse_env(&lookup, "HEATMAP_INDEX_BUCKET_SIZE")? {
            config.index_bucket_size = BucketSize::new(size)?;
        }
        if let Some(weights) = lookup("HEATMAP_LEVERAGE_WEIGHTS") {
            config.leverage_weights = weights.parse()?;
        }
        if let Some(epsilon) = parse_env(&lookup, "HEATMAP_DECAY_EPSILON")? {
            config.decay_epsilon = epsilon;
        }
        if let Some(policy) = lookup("HEATMAP_DOJI_POLICY") {
            config.doji_policy = policy.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decay_epsilon < Decimal::ZERO {
            return Err(ConfigError::NonPositive {
                name: "decay_epsilon".to_string(),
                value: self.decay_epsilon,
            });
        }
        self.model.validate()?;
        Ok(())
    }
}

fn parse_env<F>(lookup: &F, key: &str) -> Result<Option<Decimal>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| {
            Decimal::from_str(value.trim()).map_err(|error| ConfigError::Env {
                key: key.to_string(),
                value,
                reason: error.to_string(),
            })
        })
        .transpose()
}
