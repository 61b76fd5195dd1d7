use crate::market::{Candle, OIObservation};
use chrono::TimeDelta;

/// Pair each candle with the nearest not yet used open interest observation.
///
/// Observations further than `tolerance` from a candle are not matched, and each
/// observation is used for at most one candle so its delta is never counted twice.
/// Once an observation is taken, later candles fall back to the next unused one within
/// tolerance. Ties go to the earlier observation. Both inputs must be in ascending
/// time order.
pub fn align_open_interest<I>(
    candles: I,
    observations: &[OIObservation],
    tolerance: TimeDelta,
) -> Vec<(Candle, Option<OIObservation>)>
where
    I: IntoIterator<Item = Candle>,
{
    // Index of the first observation still available
    let mut next_unused = 0;

    candles
        .into_iter()
        .map(|candle| {
            let unused = &observations[next_unused..];
            let split = next_unused + unused.partition_point(|oi| oi.timestamp < candle.open_time);

            let distance = |index: usize| (observations[index].timestamp - candle.open_time).abs();
            let before = split.checked_sub(1).filter(|&index| index >= next_unused);
            let after = (split < observations.len()).then_some(split);

            let nearest = match (before, after) {
                (Some(before), Some(after)) if distance(after) < distance(before) => Some(after),
                (Some(before), _) => Some(before),
                (None, after) => after,
            };

            let matched = nearest.filter(|&index| distance(index) <= tolerance);
            if let Some(index) = matched {
                next_unused = index + 1;
            }

            (candle, matched.map(|index| observations[index].clone()))
        })
        .collect()
}
