//! Sequential position-lifecycle engine producing one [`HeatmapSnapshot`] per candle.
//!
//! Each tick runs strictly in this order:
//! 1. **Consume** positions whose liquidation price the candle's range reaches.
//! 2. **Create** positions from positive OI delta, split across the leverage weights.
//! 3. **Decay** all positions proportionally on negative OI delta.
//! 4. **Emit** a bucketed snapshot of the surviving book.
//!
//! Consuming before creating means a position never self-liquidates against the candle it
//! was opened on, unless it was opened exactly on its own liquidation boundary.

use crate::{
    book::{LiquidationPosition, PositionBook},
    config::HeatmapConfig,
    error::{ConfigError, EngineError},
    market::{Candle, OIObservation, Side, Timestamp},
    snapshot::HeatmapSnapshot,
    tier::MarginTierTable,
};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Drives one forward pass over a single symbol's candle and open interest stream.
///
/// The engine exclusively owns its [`PositionBook`]. The [`MarginTierTable`] is shared
/// read-only, so many engines (one per symbol or window) may run in parallel.
#[derive(Clone, Debug)]
pub struct HeatmapEngine {
    table: Arc<MarginTierTable>,
    config: HeatmapConfig,
    book: PositionBook,
    last_open_time: Option<Timestamp>,
}

impl HeatmapEngine {
    pub fn new(table: Arc<MarginTierTable>, config: HeatmapConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let book = PositionBook::new(config.index_bucket_size, config.decay_epsilon);

        Ok(Self {
            table,
            config,
            book,
            last_open_time: None,
        })
    }

    pub fn table(&self) -> &MarginTierTable {
        &self.table
    }

    pub fn config(&self) -> &HeatmapConfig {
        &self.config
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn into_book(self) -> PositionBook {
        self.book
    }

    /// Process a chronologically ordered stream, returning one snapshot per candle.
    ///
    /// The first ordering or calculation error aborts the run.
    pub fn run<I>(&mut self, ticks: I) -> Result<Vec<HeatmapSnapshot>, EngineError>
    where
        I: IntoIterator<Item = (Candle, Option<OIObservation>)>,
    {
        ticks
            .into_iter()
            .map(|(candle, oi)| self.step(&candle, oi.as_ref()))
            .collect()
    }

    /// Process a single tick. On error the engine state is left unchanged.
    pub fn step(
        &mut self,
        candle: &Candle,
        oi: Option<&OIObservation>,
    ) -> Result<HeatmapSnapshot, EngineError> {
        if let Some(previous) = self.last_open_time {
            if candle.open_time <= previous {
                return Err(EngineError::Ordering {
                    previous,
                    current: candle.open_time,
                });
            }
        }
        candle
            .validate()
            .map_err(|reason| EngineError::MalformedCandle {
                open_time: candle.open_time,
                reason,
            })?;

        let delta = oi.map(OIObservation::delta_or_zero).unwrap_or(Decimal::ZERO);

        // Price every new position up front so a calculation error leaves the book untouched
        let created = if delta > Decimal::ZERO {
            self.open_positions(candle, delta)?
        } else {
            Vec::new()
        };

        let consumed = self.book.consume(candle);

        let positions_created = saturating_u32(created.len());
        for position in created {
            self.book.insert(position);
        }

        if delta < Decimal::ZERO {
            self.book.decay(delta.abs());
        }

        self.last_open_time = Some(candle.open_time);

        Ok(HeatmapSnapshot {
            timestamp: candle.open_time,
            buckets: self.book.snapshot(self.config.bucket_size),
            positions_created,
            positions_consumed: saturating_u32(consumed.len()),
        })
    }

    /// Split `delta` of new open interest across the leverage weights at the candle close.
    fn open_positions(
        &self,
        candle: &Candle,
        delta: Decimal,
    ) -> Result<Vec<LiquidationPosition>, EngineError> {
        let Some(side) = self.infer_side(candle) else {
            return Ok(Vec::new());
        };

        self.config
            .leverage_weights
            .active()
            .map(|(leverage, weight)| {
                let notional = delta * weight;
                let liq_price = self.config.model.liquidation_price(
                    candle.close,
                    notional,
                    leverage,
                    side,
                    &self.table,
                )?;

                Ok(LiquidationPosition {
                    entry_price: candle.close,
                    liq_price,
                    notional,
                    side,
                    leverage,
                    created_at: candle.open_time,
                    consumed_at: None,
                })
            })
            .collect()
    }

    fn infer_side(&self, candle: &Candle) -> Option<Side> {
        candle.direction().or_else(|| self.config.doji_policy.side())
    }
}

fn saturating_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        calculator::LiquidationModel,
        config::{DojiPolicy, LeverageWeights},
        snapshot::{BucketSize, MIN_BUCKET_SIZE},
        tier::MarginTier,
    };
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn table() -> Arc<MarginTierTable> {
        Arc::new(
            MarginTierTable::new(
                "v1",
                "test",
                vec![
                    MarginTier::new(dec!(0), Some(dec!(50000)), dec!(0.005), dec!(0)),
                    MarginTier::new(dec!(50000), Some(dec!(250000)), dec!(0.01), dec!(250)),
                    MarginTier::new(dec!(250000), None, dec!(0.025), dec!(4000)),
                ],
            )
            .unwrap(),
        )
    }

    fn time(minute: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap()
    }

    fn candle(minute: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle::new(time(minute), open, high, low, close, dec!(1000))
    }

    fn oi(minute: i64, delta: Decimal) -> Option<OIObservation> {
        Some(OIObservation::new(time(minute), dec!(1000000), Some(delta)))
    }

    fn engine(config: HeatmapConfig) -> HeatmapEngine {
        HeatmapEngine::new(table(), config).unwrap()
    }

    fn fine_buckets() -> HeatmapConfig {
        HeatmapConfig {
            bucket_size: BucketSize::new(dec!(1)).unwrap(),
            ..HeatmapConfig::default()
        }
    }

    #[test]
    fn test_full_tick_creates_longs_per_leverage_tier() {
        let mut engine = engine(fine_buckets());

        let snapshot = engine
            .step(
                &candle(0, dec!(100), dec!(105), dec!(95), dec!(103)),
                oi(0, dec!(1000)).as_ref(),
            )
            .unwrap();

        assert_eq!(snapshot.timestamp, time(0));
        assert_eq!(snapshot.positions_created, 5);
        assert_eq!(snapshot.positions_consumed, 0);
        assert_eq!(snapshot.total_long(), dec!(1000));
        assert_eq!(snapshot.total_short(), dec!(0));

        let mut positions = engine.book().iter().cloned().collect::<Vec<_>>();
        positions.sort_by_key(|position| position.leverage);

        let expected = vec![
            (5, dec!(150), dec!(82.503)),
            (10, dec!(300), dec!(92.7515)),
            (25, dec!(250), dec!(98.9006)),
            (50, dec!(200), dec!(100.9503)),
            (100, dec!(100), dec!(101.97515)),
        ];
        let actual = positions
            .iter()
            .map(|position| (position.leverage, position.notional, position.liq_price))
            .collect::<Vec<_>>();
        assert_eq!(actual, expected);
        assert!(positions.iter().all(|position| position.side == Side::Long));
        assert!(positions.iter().all(|position| position.entry_price == dec!(103)));

        assert_eq!(snapshot.buckets[&dec!(82)].long_density, dec!(150));
        assert_eq!(snapshot.buckets[&dec!(92)].long_density, dec!(300));
        assert_eq!(snapshot.buckets[&dec!(101)].long_density, dec!(100));
    }

    #[test]
    fn test_later_candle_consumes_reached_positions() {
        let mut engine = engine(fine_buckets());

        engine
            .step(
                &candle(0, dec!(100), dec!(105), dec!(95), dec!(103)),
                oi(0, dec!(1000)).as_ref(),
            )
            .unwrap();

        let snapshot = engine
            .step(&candle(1, dec!(103), dec!(104), dec!(90), dec!(95)), None)
            .unwrap();

        assert_eq!(snapshot.positions_consumed, 4);
        assert_eq!(snapshot.positions_created, 0);
        assert_eq!(snapshot.total_long(), dec!(150));
        assert_eq!(engine.book().len(), 1);
    }

    #[test]
    fn test_short_creation_on_red_candle() {
        let mut engine = engine(HeatmapConfig::default());

        let snapshot = engine
            .step(
                &candle(0, dec!(100), dec!(105), dec!(95), dec!(97)),
                oi(0, dec!(500)).as_ref(),
            )
            .unwrap();

        assert_eq!(snapshot.positions_created, 5);
        assert_eq!(snapshot.total_short(), dec!(500));
        assert!(
            engine
                .book()
                .iter()
                .all(|position| position.side == Side::Short && position.liq_price > dec!(97))
        );
    }

    #[test]
    fn test_doji_policy() {
        struct TestCase {
            policy: DojiPolicy,
            expected_created: u32,
            expected_side: Option<Side>,
        }

        let tests = vec![
            TestCase {
                // TC0: skip creates nothing
                policy: DojiPolicy::Skip,
                expected_created: 0,
                expected_side: None,
            },
            TestCase {
                // TC1: attribute to longs
                policy: DojiPolicy::Long,
                expected_created: 5,
                expected_side: Some(Side::Long),
            },
            TestCase {
                // TC2: attribute to shorts
                policy: DojiPolicy::Short,
                expected_created: 5,
                expected_side: Some(Side::Short),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut engine = engine(HeatmapConfig {
                doji_policy: test.policy,
                ..HeatmapConfig::default()
            });

            let snapshot = engine
                .step(
                    &candle(0, dec!(100), dec!(105), dec!(95), dec!(100)),
                    oi(0, dec!(1000)).as_ref(),
                )
                .unwrap();

            assert_eq!(snapshot.positions_created, test.expected_created, "TC{} failed", index);
            let side = engine.book().iter().next().map(|position| position.side);
            assert_eq!(side, test.expected_side, "TC{} failed", index);
        }
    }

    #[test]
    fn test_zero_weight_tiers_create_nothing() {
        let weights =
            LeverageWeights::new([(10, dec!(0.5)), (20, dec!(0.5)), (50, dec!(0))]).unwrap();
        let mut engine = engine(HeatmapConfig {
            leverage_weights: weights,
            ..HeatmapConfig::default()
        });

        let snapshot = engine
            .step(
                &candle(0, dec!(100), dec!(105), dec!(95), dec!(103)),
                oi(0, dec!(1000)).as_ref(),
            )
            .unwrap();

        assert_eq!(snapshot.positions_created, 2);
    }

    #[test]
    fn test_missing_oi_is_zero_delta() {
        let mut engine = engine(HeatmapConfig::default());

        let snapshot = engine
            .step(&candle(0, dec!(100), dec!(105), dec!(95), dec!(103)), None)
            .unwrap();
        assert_eq!(snapshot.positions_created, 0);
        assert!(snapshot.buckets.is_empty());

        let missing_delta = OIObservation::new(time(1), dec!(1000000), None);
        let snapshot = engine
            .step(
                &candle(1, dec!(100), dec!(105), dec!(95), dec!(103)),
                Some(&missing_delta),
            )
            .unwrap();
        assert_eq!(snapshot.positions_created, 0);
    }

    #[test]
    fn test_negative_delta_decays_book() {
        let mut engine = engine(HeatmapConfig::default());

        engine
            .step(
                &candle(0, dec!(100), dec!(101), dec!(99), dec!(101)),
                oi(0, dec!(1000)).as_ref(),
            )
            .unwrap();

        // Range stays inside every liquidation price
        let snapshot = engine
            .step(
                &candle(1, dec!(101), dec!(101.5), dec!(100.5), dec!(101)),
                oi(1, dec!(-250)).as_ref(),
            )
            .unwrap();

        assert_eq!(snapshot.positions_consumed, 0);
        assert_eq!(snapshot.total_long(), dec!(750));
        assert_eq!(engine.book().total_notional(), dec!(750));
    }

    #[test]
    fn test_consumption_happens_before_creation() {
        let mut engine = engine(fine_buckets());

        // The 100x long sits just below the close; the next candle's wick goes below it
        // while also growing OI, and the fresh positions must survive their own candle.
        engine
            .step(
                &candle(0, dec!(100), dec!(105), dec!(95), dec!(103)),
                oi(0, dec!(1000)).as_ref(),
            )
            .unwrap();

        let snapshot = engine
            .step(
                &candle(1, dec!(103), dec!(104), dec!(101), dec!(103.5)),
                oi(1, dec!(1000)).as_ref(),
            )
            .unwrap();

        // Only the 100x from tick 0 (liq 101.97515) is reached by low 101
        assert_eq!(snapshot.positions_consumed, 1);
        assert_eq!(snapshot.positions_created, 5);
        assert_eq!(engine.book().len(), 9);
    }

    #[test]
    fn test_volume_conservation_without_consumption() {
        let mut engine = engine(HeatmapConfig::default());

        let deltas = [dec!(1000), dec!(333.33), dec!(12.5), dec!(7777), dec!(0.07)];
        let mut created = Decimal::ZERO;

        for (minute, delta) in deltas.into_iter().enumerate() {
            let minute = minute as i64;
            // Alternate green and red candles with a range too narrow to reach any position
            let (open, close) = if minute % 2 == 0 {
                (dec!(100), dec!(100.1))
            } else {
                (dec!(100.1), dec!(100))
            };
            let snapshot = engine
                .step(
                    &candle(minute, open, dec!(100.1), dec!(100), close),
                    oi(minute, delta).as_ref(),
                )
                .unwrap();
            assert_eq!(snapshot.positions_consumed, 0);
            created += delta;
        }

        let total = engine.book().total_notional();
        assert!((total - created).abs() < dec!(0.0000001));

        let snapshot_total = engine
            .book()
            .snapshot(BucketSize::default())
            .values()
            .map(|bucket| bucket.total())
            .sum::<Decimal>();
        assert_eq!(snapshot_total, total);
    }

    #[test]
    fn test_ordering_errors_abort_run() {
        struct TestCase {
            second_minute: i64,
        }

        let tests = vec![
            TestCase {
                // TC0: duplicate timestamp
                second_minute: 0,
            },
            TestCase {
                // TC1: timestamp goes backwards
                second_minute: -1,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut engine = engine(HeatmapConfig::default());
            let ticks = vec![
                (candle(0, dec!(100), dec!(105), dec!(95), dec!(103)), oi(0, dec!(1000))),
                (
                    candle(test.second_minute, dec!(100), dec!(105), dec!(95), dec!(103)),
                    oi(test.second_minute, dec!(1000)),
                ),
                (candle(5, dec!(100), dec!(105), dec!(95), dec!(103)), None),
            ];

            let actual = engine.run(ticks);
            assert_eq!(
                actual,
                Err(EngineError::Ordering {
                    previous: time(0),
                    current: time(test.second_minute),
                }),
                "TC{} failed",
                index
            );
        }
    }

    #[test]
    fn test_malformed_candle_leaves_state_untouched() {
        let mut engine = engine(HeatmapConfig::default());

        engine
            .step(
                &candle(0, dec!(100), dec!(105), dec!(95), dec!(103)),
                oi(0, dec!(1000)).as_ref(),
            )
            .unwrap();

        let actual = engine.step(
            &candle(1, dec!(100), dec!(90), dec!(95), dec!(100)),
            oi(1, dec!(1000)).as_ref(),
        );
        assert!(matches!(actual, Err(EngineError::MalformedCandle { .. })));
        assert_eq!(engine.book().len(), 5);

        // The rejected candle does not advance the ordering cursor
        assert!(
            engine
                .step(&candle(1, dec!(100), dec!(105), dec!(95), dec!(103)), None)
                .is_ok()
        );
    }

    #[test]
    fn test_run_emits_one_snapshot_per_candle() {
        let mut engine = engine(HeatmapConfig::default());
        let ticks = (0..10)
            .map(|minute| {
                (
                    candle(minute, dec!(100), dec!(105), dec!(95), dec!(103)),
                    oi(minute, dec!(100)),
                )
            })
            .collect::<Vec<_>>();

        let snapshots = engine.run(ticks).unwrap();
        assert_eq!(snapshots.len(), 10);
        assert!(snapshots.windows(2).all(|pair| pair[0].timestamp < pair[1].timestamp));
    }

    #[test]
    fn test_engine_uses_configured_model() {
        let mut engine = engine(HeatmapConfig {
            leverage_weights: LeverageWeights::new([(10, dec!(1))]).unwrap(),
            model: LiquidationModel::FundingAdjusted {
                funding_rate: dec!(0.001),
                periods: 1,
            },
            ..HeatmapConfig::default()
        });

        engine
            .step(
                &candle(0, dec!(100), dec!(105), dec!(95), dec!(103)),
                oi(0, dec!(1000)).as_ref(),
            )
            .unwrap();

        let position = engine.book().iter().next().cloned().unwrap();
        // 103 × 0.9005 + 103 × 0.001
        assert_eq!(position.liq_price, dec!(92.8545));
    }

    #[test]
    fn test_smallest_bucket_size_steps_without_overflow() {
        let smallest = BucketSize::new(MIN_BUCKET_SIZE).unwrap();
        let mut engine = engine(HeatmapConfig {
            bucket_size: smallest,
            index_bucket_size: smallest,
            ..HeatmapConfig::default()
        });

        let snapshot = engine
            .step(
                &candle(0, dec!(100000), dec!(100500), dec!(99500), dec!(100300)),
                oi(0, dec!(1000)).as_ref(),
            )
            .unwrap();
        assert_eq!(snapshot.positions_created, 5);
        assert_eq!(snapshot.buckets.len(), 5);

        let snapshot = engine
            .step(&candle(1, dec!(100300), dec!(100400), dec!(98000), dec!(98500)), None)
            .unwrap();
        // 50x (98304.03) and 100x (99302.015) are reached by the 98000 low
        assert_eq!(snapshot.positions_consumed, 2);
    }

    #[test]
    fn test_invalid_model_rejected_at_construction() {
        let config = HeatmapConfig {
            model: LiquidationModel::Ensemble { members: vec![] },
            ..HeatmapConfig::default()
        };
        assert!(HeatmapEngine::new(table(), config).is_err());
    }
}
