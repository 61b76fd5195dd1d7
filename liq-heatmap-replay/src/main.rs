use liq_heatmap::{
    Candle, ConfigError, EngineError, HeatmapConfig, HeatmapEngine, HeatmapSnapshot,
    MarginTierTable, OIObservation, align_open_interest,
};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::{
    io::{BufWriter, Write},
    path::PathBuf,
    sync::Arc,
};
use thiserror::Error;
use tracing::{error, info, warn};

/// Default distance within which an open interest observation is matched to a candle.
const DEFAULT_OI_TOLERANCE_SECS: i64 = 30;

const OI_TOLERANCE_KEY: &str = "HEATMAP_OI_TOLERANCE_SECS";

/// Recorded market history for one symbol.
#[derive(Debug, Deserialize)]
struct ReplayFile {
    symbol: String,
    /// Tier table to price positions with. Defaults to the Binance BTCUSDT schedule.
    #[serde(default)]
    tiers: Option<MarginTierTable>,
    candles: Vec<Candle>,
    #[serde(default)]
    open_interest: Vec<OIObservation>,
}

/// One emitted line of output.
#[derive(Debug, Serialize)]
struct SnapshotMessage<'a> {
    symbol: &'a str,
    #[serde(flatten)]
    snapshot: &'a HeatmapSnapshot,
}

#[derive(Debug)]
struct ReplayOutput {
    symbol: String,
    snapshots: Vec<HeatmapSnapshot>,
    open_positions: usize,
}

#[derive(Debug, Error)]
enum ReplayError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{symbol}: {source}")]
    Engine { symbol: String, source: EngineError },

    #[error("replay task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("failed to write output: {0}")]
    Write(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    init_logging();

    let paths = std::env::args().skip(1).map(PathBuf::from).collect::<Vec<_>>();
    if paths.is_empty() {
        error!("usage: liq-heatmap-replay <replay.json>...");
        std::process::exit(2);
    }

    match run(paths).await {
        Ok(0) => {}
        Ok(failures) => {
            warn!(failures, "Some replays failed");
            std::process::exit(1);
        }
        Err(error) => {
            error!(%error, "Replay aborted");
            std::process::exit(1);
        }
    }
}

/// Replay every file, returning the number that failed.
async fn run(paths: Vec<PathBuf>) -> Result<usize, ReplayError> {
    let config = HeatmapConfig::from_env()?;

    let tolerance = oi_tolerance(|key| std::env::var(key).ok())?;

    info!(
        files = paths.len(),
        bucket_size = %config.bucket_size.value(),
        doji_policy = ?config.doji_policy,
        tolerance_secs = tolerance.num_seconds(),
        "Starting liquidation heatmap replay"
    );

    let default_table = Arc::new(MarginTierTable::binance_btcusdt());

    // Symbols are independent, so each replays on its own blocking worker
    let tasks = paths
        .into_iter()
        .map(|path| {
            let config = config.clone();
            let default_table = Arc::clone(&default_table);
            tokio::task::spawn_blocking(move || replay(path, config, default_table, tolerance))
        })
        .collect::<Vec<_>>();

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut failures = 0;

    for task in tasks {
        match task.await? {
            Ok(output) => {
                for snapshot in &output.snapshots {
                    let message = SnapshotMessage {
                        symbol: &output.symbol,
                        snapshot,
                    };
                    let line = serde_json::to_string(&message).map_err(std::io::Error::other)?;
                    writeln!(out, "{line}")?;
                }

                info!(
                    symbol = %output.symbol,
                    snapshots = output.snapshots.len(),
                    open_positions = output.open_positions,
                    "Replay complete"
                );
            }
            Err(error) => {
                failures += 1;
                error!(%error, "Replay failed");
            }
        }
    }

    out.flush()?;

    Ok(failures)
}

fn replay(
    path: PathBuf,
    config: HeatmapConfig,
    default_table: Arc<MarginTierTable>,
    tolerance: TimeDelta,
) -> Result<ReplayOutput, ReplayError> {
    let contents = std::fs::read_to_string(&path).map_err(|source| ReplayError::Read {
        path: path.clone(),
        source,
    })?;
    let file: ReplayFile =
        serde_json::from_str(&contents).map_err(|source| ReplayError::Parse { path, source })?;

    let table = match file.tiers {
        Some(tiers) => Arc::new(tiers),
        None => default_table,
    };

    info!(
        symbol = %file.symbol,
        candles = file.candles.len(),
        observations = file.open_interest.len(),
        table = table.version(),
        "Replaying"
    );

    let ticks = align_open_interest(file.candles, &file.open_interest, tolerance);
    let unmatched = ticks.iter().filter(|(_, oi)| oi.is_none()).count();
    if unmatched > 0 {
        warn!(
            symbol = %file.symbol,
            unmatched,
            "Candles without open interest treated as zero delta"
        );
    }

    let mut engine = HeatmapEngine::new(table, config)?;
    let snapshots = engine.run(ticks).map_err(|source| ReplayError::Engine {
        symbol: file.symbol.clone(),
        source,
    })?;

    Ok(ReplayOutput {
        symbol: file.symbol,
        snapshots,
        open_positions: engine.book().len(),
    })
}

/// Alignment tolerance, configurable via HEATMAP_OI_TOLERANCE_SECS (default: 30).
fn oi_tolerance<F>(lookup: F) -> Result<TimeDelta, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(OI_TOLERANCE_KEY) else {
        return Ok(TimeDelta::seconds(DEFAULT_OI_TOLERANCE_SECS));
    };

    let env_error = |reason: String| ConfigError::Env {
        key: OI_TOLERANCE_KEY.to_string(),
        value: value.clone(),
        reason,
    };

    let seconds = value
        .trim()
        .parse::<i64>()
        .map_err(|error| env_error(error.to_string()))?;
    if seconds < 0 {
        return Err(env_error("tolerance must not be negative".to_string()));
    }

    TimeDelta::try_seconds(seconds)
        .ok_or_else(|| env_error("tolerance is out of range".to_string()))
}

/// Initialize logging. Output goes to stderr so stdout carries only snapshots.
fn init_logging() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
