//! # Liquidation Heatmap
//! Reconstructs the leveraged positions traders could be holding from a candle and open
//! interest stream, and tracks where those positions would be force-liquidated.
//!
//! The crate is split into two coupled halves:
//! - A tiered maintenance-margin [`MarginTierTable`] and [`liquidation_price`] calculator that
//!   is continuous across tier boundaries.
//! - A [`HeatmapEngine`] that folds over the candle stream, creating, consuming and decaying
//!   synthetic positions in a [`PositionBook`] and emitting one [`HeatmapSnapshot`] per tick.
//!
//! ## Example
//! ```rust
//! use liq_heatmap::{Candle, HeatmapConfig, HeatmapEngine, MarginTierTable, OIObservation};
//! use chrono::{TimeZone, Utc};
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//!
//! let table = Arc::new(MarginTierTable::binance_btcusdt());
//! let mut engine = HeatmapEngine::new(table, HeatmapConfig::default()).unwrap();
//!
//! let open_time = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
//! let candle = Candle::new(open_time, dec!(100), dec!(105), dec!(95), dec!(103), dec!(10));
//! let oi = OIObservation::new(open_time, dec!(1000000), Some(dec!(1000)));
//!
//! let snapshots = engine.run([(candle, Some(oi))]).unwrap();
//! assert_eq!(snapshots[0].positions_created, 5);
//! ```
//!
//! The core performs no I/O and no logging. Engines own their state exclusively, while
//! tier tables are immutable and shared behind an [`Arc`](std::sync::Arc), so independent
//! symbols or windows can be processed in parallel without locking.

/// Candle to open interest alignment for building engine input.
pub mod align;

/// Exact liquidation price calculation and pluggable [`LiquidationModel`]s.
pub mod calculator;

/// Synthetic position storage with consumption and proportional decay.
pub mod book;

/// Engine configuration and environment loading.
pub mod config;

/// Per-symbol candle stream processing.
pub mod engine;

/// All errors generated in `liq-heatmap`.
pub mod error;

/// Versioned margin tier table registry.
pub mod history;

/// Candle, open interest and side inputs.
pub mod market;

/// Price bucketing and [`HeatmapSnapshot`] output.
pub mod snapshot;

/// Progressive maintenance-margin tiers.
pub mod tier;

pub use align::align_open_interest;
pub use book::{LiquidationPosition, PositionBook};
pub use calculator::{LiquidationModel, WeightedModel, liquidation_price};
pub use config::{DojiPolicy, HeatmapConfig, LeverageWeights};
pub use engine::HeatmapEngine;
pub use error::{ConfigError, EngineError, MarginError, TierError};
pub use history::TierTableHistory;
pub use market::{Candle, OIObservation, Side, Timestamp};
pub use snapshot::{BucketDensity, BucketSize, HeatmapSnapshot};
pub use tier::{MarginTier, MarginTierTable};
