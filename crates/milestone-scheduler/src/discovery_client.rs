//! A single, cheap, near-realtime per-channel sampler over the secondary API. Not billed against
//! the daily quota. Unlike the statistics client there is no batching or quota logic to wrap, so
//! the collaborator boundary is the trait itself.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::model::Snapshot;

#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Returns `Ok(None)` if the channel is unknown upstream or the response omits subscribers.
    async fn fetch_channel(&self, channel_id: &str) -> Result<Option<Snapshot>, TransportError>;
}
