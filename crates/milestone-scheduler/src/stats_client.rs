//! Bulk sampler over the primary statistics API.
//!
//! The concrete wire transport is represented by the thin `RawStatisticsTransport` boundary; this
//! module owns the batching, quota reserve/consume, and partial-failure logic around that
//! boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{instrument, warn};

use crate::clock::{Clock, QuotaAccountant};
use crate::error::{QuotaError, TransportError};
use crate::model::Snapshot;

/// The actual network boundary, left unimplemented here. A batch call represents one external
/// request covering up to `stats_batch_size` channel ids.
#[async_trait]
pub trait RawStatisticsTransport: Send + Sync {
    async fn fetch_batch(
        &self,
        channel_ids: &[String],
    ) -> Result<HashMap<String, Snapshot>, TransportError>;
}

/// Wraps a `RawStatisticsTransport` with batching and quota discipline.
pub struct StatisticsClient<C: Clock> {
    transport: Arc<dyn RawStatisticsTransport>,
    quota: Arc<QuotaAccountant<C>>,
    batch_size: usize,
    call_timeout: Duration,
}

impl<C: Clock> StatisticsClient<C> {
    pub fn new(
        transport: Arc<dyn RawStatisticsTransport>,
        quota: Arc<QuotaAccountant<C>>,
        batch_size: usize,
        call_timeout: Duration,
    ) -> Self {
        Self { transport, quota, batch_size, call_timeout }
    }

    /// Fetches statistics for `channel_ids`. Reserves the worst-case cost (one token per id)
    /// before making any call; consumes the actually-observed cost afterward, which may be lower
    /// than reserved if some batches failed.
    #[instrument(skip(self, channel_ids), fields(requested = channel_ids.len()))]
    pub async fn fetch_statistics(
        &self,
        channel_ids: &[String],
    ) -> Result<HashMap<String, Snapshot>, QuotaError> {
        let worst_case_cost = channel_ids.len() as i64;
        self.quota.reserve(worst_case_cost)?;

        let mut results = HashMap::new();
        let mut actual_cost: i64 = 0;

        for batch in channel_ids.chunks(self.batch_size) {
            match tokio::time::timeout(self.call_timeout, self.transport.fetch_batch(batch)).await
            {
                Ok(Ok(batch_results)) => {
                    actual_cost += batch_results.len() as i64;
                    results.extend(batch_results);
                }
                Ok(Err(e)) => {
                    warn!(error = %e, batch_len = batch.len(), "statistics batch failed, skipping");
                }
                Err(_) => {
                    warn!(batch_len = batch.len(), "statistics batch timed out, skipping");
                }
            }
        }

        self.quota.consume(actual_cost);
        Ok(results)
    }
}
