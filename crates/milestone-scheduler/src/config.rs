//! Every recognized scheduler option, each with an explicit default, validated eagerly at
//! `Scheduler::new` rather than degraded at runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The broad 12-rung default subscriber ladder.
pub const DEFAULT_LADDER: &[u64] = &[
    100_000,
    250_000,
    500_000,
    750_000,
    1_000_000,
    1_500_000,
    2_000_000,
    2_500_000,
    3_000_000,
    4_000_000,
    5_000_000,
    10_000_000,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(with = "humantime_serde_secs")]
    pub bulk_interval: Duration,
    #[serde(with = "humantime_serde_secs")]
    pub watch_interval: Duration,

    pub channels_per_batch: usize,
    pub batches_per_day: u32,

    pub milestone_threshold_ratio: f64,
    pub approaching_threshold_ratio: f64,

    pub daily_quota_limit: i64,
    pub quota_safety_margin: i64,
    pub stats_batch_size: usize,

    #[serde(with = "humantime_serde_secs")]
    pub cache_ttl_latest: Duration,
    #[serde(with = "humantime_serde_secs")]
    pub cache_ttl_recent_videos: Duration,

    pub subscriber_ladder: Vec<u64>,
    pub quota_timezone: String,

    pub near_miss_concurrency: usize,

    #[serde(with = "humantime_serde_secs")]
    pub external_call_timeout: Duration,
    #[serde(with = "humantime_serde_secs")]
    pub storage_call_timeout: Duration,

    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bulk_interval: Duration::from_secs(12 * 3600),
            watch_interval: Duration::from_secs(3600),
            channels_per_batch: 30,
            batches_per_day: 2,
            milestone_threshold_ratio: 0.95,
            approaching_threshold_ratio: 0.99,
            daily_quota_limit: 10_000,
            quota_safety_margin: 500,
            stats_batch_size: 50,
            cache_ttl_latest: Duration::from_secs(600),
            cache_ttl_recent_videos: Duration::from_secs(24 * 3600),
            subscriber_ladder: DEFAULT_LADDER.to_vec(),
            quota_timezone: "America/Los_Angeles".to_string(),
            near_miss_concurrency: 8,
            external_call_timeout: Duration::from_secs(10),
            storage_call_timeout: Duration::from_secs(2),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Rejects structurally impossible configuration. Returns `Err` rather than panicking; a
    /// config error is fatal and must never start a degraded scheduler.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subscriber_ladder.is_empty() {
            return Err(ConfigError::EmptyLadder);
        }
        for pair in self.subscriber_ladder.windows(2) {
            if pair[0] >= pair[1] {
                return Err(ConfigError::NonIncreasingLadder { prev: pair[0], next: pair[1] });
            }
        }
        if self.stats_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.channels_per_batch == 0 {
            return Err(ConfigError::ZeroChannelsPerBatch);
        }
        if self.batches_per_day == 0 {
            return Err(ConfigError::ZeroBatchesPerDay);
        }
        if self.near_miss_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.quota_safety_margin >= self.daily_quota_limit {
            return Err(ConfigError::MarginExceedsLimit);
        }
        if self.quota_timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::UnknownTimezone { name: self.quota_timezone.clone() });
        }
        Ok(())
    }
}

/// Minimal `Duration <-> seconds` serde adapter: configs are authored as plain integers
/// (seconds), not `humantime` strings, so a small local module suffices in place of the
/// `humantime-serde` crate.
mod humantime_serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
