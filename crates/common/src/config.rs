use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Granularity, Result};

/// Process configuration, built once at startup and handed to each component.
#[derive(Debug, Clone)]
pub struct Config {
    pub instrument: String,
    pub granularity: Granularity,

    /// Delay between price polls.
    pub price_poll_interval: Duration,
    /// Delay before re-polling when the latest candle has not closed yet.
    pub candle_retry_interval: Duration,
    /// Number of historical candles used to seed the series.
    pub initial_candle_count: usize,
    /// Fractional digits for derived prices and indicator values.
    pub price_scale: u32,

    pub strategy_config_path: PathBuf,
    /// Replay file for the paper broker.
    pub replay_path: Option<PathBuf>,
}

impl Config {
    pub const DEFAULT_PRICE_POLL_MS: u64 = 1_000;
    pub const DEFAULT_CANDLE_RETRY_MS: u64 = 5_000;
    pub const DEFAULT_INITIAL_CANDLES: usize = 100;
    pub const DEFAULT_PRICE_SCALE: u32 = 5;

    /// Load configuration from environment variables, reading `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("required variable '{key}' is not set")))
        };

        let instrument = required("PIPWATCH_INSTRUMENT")?;
        let granularity = Granularity::from_str(&required("PIPWATCH_GRANULARITY")?)
            .map_err(|e| Error::Config(format!("PIPWATCH_GRANULARITY: {e}")))?;

        let price_poll_ms: u64 =
            parse_optional(&lookup, "PRICE_POLL_INTERVAL_MS", Self::DEFAULT_PRICE_POLL_MS)?;
        let candle_retry_ms: u64 =
            parse_optional(&lookup, "CANDLE_RETRY_INTERVAL_MS", Self::DEFAULT_CANDLE_RETRY_MS)?;
        if price_poll_ms == 0 || candle_retry_ms == 0 {
            return Err(Error::Config("poll intervals must be greater than zero".into()));
        }

        let initial_candle_count =
            parse_optional(&lookup, "INITIAL_CANDLE_COUNT", Self::DEFAULT_INITIAL_CANDLES)?;
        let price_scale = parse_optional(&lookup, "PRICE_SCALE", Self::DEFAULT_PRICE_SCALE)?;
        if price_scale > 28 {
            return Err(Error::Config(format!(
                "PRICE_SCALE must be at most 28, got {price_scale}"
            )));
        }

        Ok(Config {
            instrument,
            granularity,
            price_poll_interval: Duration::from_millis(price_poll_ms),
            candle_retry_interval: Duration::from_millis(candle_retry_ms),
            initial_candle_count,
            price_scale,
            strategy_config_path: lookup("STRATEGY_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config/strategies.toml")),
            replay_path: lookup("REPLAY_PATH").map(PathBuf::from),
        })
    }
}

fn parse_optional<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{key}='{raw}': {e}"))),
    }
}
