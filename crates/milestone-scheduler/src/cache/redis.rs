//! Redis-backed `StatsCache`, feature-gated behind `redis-cache`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

use crate::model::Observation;

use super::{latest_key, recent_videos_key, StatsCache};

/// Thin wrapper around `redis::aio::ConnectionManager`. Read/write failures are logged and
/// treated as a cache miss/no-op rather than surfaced. The cache is a best-effort accelerator,
/// never a source of truth.
pub struct RedisStatsCache {
    conn: ConnectionManager,
}

impl RedisStatsCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl StatsCache for RedisStatsCache {
    async fn get_latest(&self, channel_id: &str) -> Option<Observation> {
        let mut conn = self.conn.clone();
        let key = latest_key(channel_id);
        let raw: Option<String> = match conn.get(&key).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, %key, "redis get failed, treating as cache miss");
                return None;
            }
        };
        raw.and_then(|s| match serde_json::from_str::<Observation>(&s) {
            Ok(obs) => Some(obs),
            Err(e) => {
                warn!(error = %e, %key, "failed to deserialize cached observation");
                None
            }
        })
    }

    async fn set_latest(&self, channel_id: &str, observation: &Observation, ttl: Duration) {
        let mut conn = self.conn.clone();
        let key = latest_key(channel_id);
        let Ok(payload) = serde_json::to_string(observation) else {
            warn!(%key, "failed to serialize observation for cache write");
            return;
        };
        let ttl_secs = ttl.as_secs().max(1);
        if let Err(e) = conn.set_ex::<_, _, ()>(&key, payload, ttl_secs).await {
            warn!(error = %e, %key, "redis set_ex failed");
        }
    }

    async fn set_recent_videos(&self, channel_id: &str, video_ids: &[String], ttl: Duration) {
        let mut conn = self.conn.clone();
        let key = recent_videos_key(channel_id);
        let Ok(payload) = serde_json::to_string(video_ids) else {
            warn!(%key, "failed to serialize recent videos for cache write");
            return;
        };
        let ttl_secs = ttl.as_secs().max(1);
        if let Err(e) = conn.set_ex::<_, _, ()>(&key, payload, ttl_secs).await {
            warn!(error = %e, %key, "redis set_ex failed");
        }
    }

    async fn invalidate(&self, key: &str) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn.del::<_, ()>(key).await {
            warn!(error = %e, %key, "redis del failed");
        }
    }
}
