//! A short-TTL read-through accelerator in front of the repository. Optional: the scheduler must
//! tolerate its absence by branching on `Option`.

#[cfg(feature = "redis-cache")]
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::model::Observation;

#[async_trait]
pub trait StatsCache: Send + Sync {
    async fn get_latest(&self, channel_id: &str) -> Option<Observation>;
    async fn set_latest(&self, channel_id: &str, observation: &Observation, ttl: Duration);
    async fn set_recent_videos(&self, channel_id: &str, video_ids: &[String], ttl: Duration);
    async fn invalidate(&self, key: &str);
}

pub fn latest_key(channel_id: &str) -> String {
    format!("stats:last:{channel_id}")
}

pub fn recent_videos_key(channel_id: &str) -> String {
    format!("recent_videos:{channel_id}")
}

/// In-memory fallback: a `tokio::sync::RwLock<HashMap<..>>` with manual expiry checks. Used in
/// tests and as a degraded single-process cache when no Redis is configured.
pub mod memory {
    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    use tokio::sync::RwLock;

    use super::*;

    struct Entry<T> {
        value: T,
        expires_at: Instant,
    }

    #[derive(Default)]
    pub struct InMemoryStatsCache {
        latest: RwLock<HashMap<String, Entry<Observation>>>,
        recent_videos: RwLock<HashMap<String, Entry<Vec<String>>>>,
    }

    impl InMemoryStatsCache {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl StatsCache for InMemoryStatsCache {
        async fn get_latest(&self, channel_id: &str) -> Option<Observation> {
            let key = latest_key(channel_id);
            let map = self.latest.read().await;
            let entry = map.get(&key)?;
            if entry.expires_at < Instant::now() {
                return None;
            }
            Some(entry.value.clone())
        }

        async fn set_latest(&self, channel_id: &str, observation: &Observation, ttl: Duration) {
            let key = latest_key(channel_id);
            let mut map = self.latest.write().await;
            map.insert(
                key,
                Entry { value: observation.clone(), expires_at: Instant::now() + ttl },
            );
        }

        async fn set_recent_videos(&self, channel_id: &str, video_ids: &[String], ttl: Duration) {
            let key = recent_videos_key(channel_id);
            let mut map = self.recent_videos.write().await;
            map.insert(
                key,
                Entry { value: video_ids.to_vec(), expires_at: Instant::now() + ttl },
            );
        }

        async fn invalidate(&self, key: &str) {
            self.latest.write().await.remove(key);
            self.recent_videos.write().await.remove(key);
        }
    }
}
