//! An immutable snapshot of tracked channels.

use async_trait::async_trait;

use crate::model::Channel;

/// Returns the set of tracked channels. Implementations may hit an upstream provider lazily, but
/// the reference implementation below is a fixed snapshot captured at construction.
#[async_trait]
pub trait ChannelRegistry: Send + Sync {
    async fn all(&self) -> Vec<Channel>;
}

/// Wraps an immutable snapshot captured once at construction. The snapshot never changes for the
/// lifetime of the process, so a plain `Arc<[Channel]>` is sufficient; no swap mechanism needed.
pub struct StaticChannelRegistry {
    channels: std::sync::Arc<[Channel]>,
}

impl StaticChannelRegistry {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self { channels: channels.into() }
    }
}

#[async_trait]
impl ChannelRegistry for StaticChannelRegistry {
    async fn all(&self) -> Vec<Channel> {
        self.channels.to_vec()
    }
}
