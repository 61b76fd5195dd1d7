use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while validating a [`MarginTierTable`](crate::tier::MarginTierTable).
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum TierError {
    #[error("margin tier table must contain at least one tier")]
    Empty,

    #[error("first margin tier must start at zero notional, found {0}")]
    FirstTierNotZero(Decimal),

    #[error("first margin tier must have zero maintenance_amount, found {0}")]
    FirstTierMaintenanceAmount(Decimal),

    #[error("margin tier {index} has an empty notional range [{min}, {max})")]
    EmptyRange {
        index: usize,
        min: Decimal,
        max: Decimal,
    },

    #[error("margin tier {index} has margin_rate {rate} outside (0, 1]")]
    InvalidMarginRate { index: usize, rate: Decimal },

    #[error("margin tier {index} has negative maintenance_amount {amount}")]
    NegativeMaintenanceAmount { index: usize, amount: Decimal },

    #[error("margin tier {index} is unbounded but is not the final tier")]
    UnboundedInnerTier { index: usize },

    #[error("final margin tier must be unbounded, found upper bound {0}")]
    BoundedFinalTier(Decimal),

    #[error("margin tiers {index} and {next} are not contiguous: {max} != {next_min}")]
    Gap {
        index: usize,
        next: usize,
        max: Decimal,
        next_min: Decimal,
    },

    #[error("margin_rate decreases between tiers {index} and {next}: {rate} > {next_rate}")]
    NonMonotonicRate {
        index: usize,
        next: usize,
        rate: Decimal,
        next_rate: Decimal,
    },

    #[error(
        "\
        margin is discontinuous at boundary {boundary}: lower tier yields {lower}, \
        upper tier yields {upper} \
    "
    )]
    Discontinuity {
        boundary: Decimal,
        lower: Decimal,
        upper: Decimal,
    },

    #[error("margin tier table version {0} is already registered")]
    DuplicateVersion(String),
}

/// Errors produced while building or loading a [`HeatmapConfig`](crate::config::HeatmapConfig).
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum ConfigError {
    #[error("leverage weights must contain at least one entry")]
    WeightsEmpty,

    #[error("leverage {0}x is invalid, leverage must be at least 1")]
    InvalidLeverage(u32),

    #[error("leverage {0}x appears more than once in the weight table")]
    DuplicateLeverage(u32),

    #[error("weight {weight} for leverage {leverage}x must be within [0, 1]")]
    InvalidWeight { leverage: u32, weight: Decimal },

    #[error("weight {0} cannot be represented as a decimal")]
    UnrepresentableWeight(String),

    #[error("leverage weights must sum to 1.0, found {0}")]
    WeightSum(Decimal),

    #[error("{name} must be positive, found {value}")]
    NonPositive { name: String, value: Decimal },

    #[error("bucket_size {value} is below the minimum {min}")]
    BucketSizeTooSmall { value: Decimal, min: Decimal },

    #[error("invalid liquidation model: {0}")]
    Model(#[from] MarginError),

    #[error("failed to parse env var {key}={value}: {reason}")]
    Env {
        key: String,
        value: String,
        reason: String,
    },
}

/// Per-calculation domain errors raised by the liquidation price calculator and models.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum MarginError {
    #[error("notional must be positive, found {0}")]
    InvalidNotional(Decimal),

    #[error("leverage must be at least 1, found {0}")]
    InvalidLeverage(u32),

    #[error("ensemble liquidation model must contain at least one member")]
    EmptyEnsemble,

    #[error("ensemble member weights must sum to 1.0, found {0}")]
    EnsembleWeightSum(Decimal),

    #[error("ensemble member weight {0} must be within [0, 1]")]
    InvalidEnsembleWeight(Decimal),
}

/// All errors that abort a [`HeatmapEngine`](crate::engine::HeatmapEngine) run.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum EngineError {
    #[error(
        "\
        OrderingError: candle open_time {current} does not follow on from the \
        previous open_time {previous} \
    "
    )]
    Ordering {
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("malformed candle at {open_time}: {reason}")]
    MalformedCandle {
        open_time: DateTime<Utc>,
        reason: String,
    },

    #[error("liquidation price calculation failed: {0}")]
    Margin(#[from] MarginError),
}

impl EngineError {
    /// Determine if an error stems from the input stream itself, meaning a re-run with
    /// re-fetched data might succeed, rather than from engine configuration.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_input_error(&self) -> bool {
        match self {
            EngineError::Ordering { .. } | EngineError::MalformedCandle { .. } => true,
            _ => false,
        }
    }
}
