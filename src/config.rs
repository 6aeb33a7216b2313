use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Runtime tuning for the price source and the refresh loop.
///
/// Defaults mirror the mock backend: 50ms simulated latency and a
/// +/- $500 random walk per sample.
#[derive(Debug, Clone)]
pub struct Config {
    // Simulated latency for every price source call.
    pub latency_ms: u64,

    // Max absolute change (dollars) between two consecutive samples of one car.
    pub fluctuation: i64,

    // How often a session re-samples every priced car in place. 0 disables.
    pub auto_refresh_ms: u64,

    // Store change broadcast buffer.
    pub event_capacity: usize,

    // Cars the binary tracks when it starts.
    pub track_on_start: Vec<String>,

    // How long the binary keeps its viewing session open.
    pub run_secs: u64,

    // Fixed RNG seed for reproducible walks. None => entropy.
    pub rng_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            latency_ms: 50,
            fluctuation: 500,
            auto_refresh_ms: 30_000,
            event_capacity: 64,
            track_on_start: vec!["1".to_string(), "3".to_string()],
            run_secs: 5,
            rng_seed: None,
        }
    }
}

impl Config {
    /// Defaults, overridden by `CAR_TRACKER_*` variables (a `.env` file is honored).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut cfg = Self::default();
        if let Some(v) = parse_var("CAR_TRACKER_LATENCY_MS")? {
            cfg.latency_ms = v;
        }
        if let Some(v) = parse_var("CAR_TRACKER_FLUCTUATION")? {
            cfg.fluctuation = v;
        }
        if let Some(v) = parse_var("CAR_TRACKER_AUTO_REFRESH_MS")? {
            cfg.auto_refresh_ms = v;
        }
        if let Some(v) = parse_var("CAR_TRACKER_EVENT_CAPACITY")? {
            cfg.event_capacity = v;
        }
        if let Some(v) = parse_var("CAR_TRACKER_RUN_SECS")? {
            cfg.run_secs = v;
        }
        if let Some(v) = parse_var("CAR_TRACKER_SEED")? {
            cfg.rng_seed = Some(v);
        }
        if let Ok(raw) = env::var("CAR_TRACKER_TRACK") {
            cfg.track_on_start = parse_id_list(&raw);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.fluctuation >= 0, "fluctuation must be >= 0 (got {})", self.fluctuation);
        anyhow::ensure!(self.event_capacity > 0, "event_capacity must be > 0");
        Ok(())
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn auto_refresh(&self) -> Option<Duration> {
        (self.auto_refresh_ms > 0).then(|| Duration::from_millis(self.auto_refresh_ms))
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => {
            let v = raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {name}: {raw:?}"))?;
            Ok(Some(v))
        }
        Err(_) => Ok(None),
    }
}

/// "1, 3,,5" => ["1", "3", "5"]
pub fn parse_id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
