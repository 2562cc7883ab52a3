//! Persisted time series, milestone records, approaching notifications, and audit rows.

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RepositoryError;
use crate::model::{
    ApproachingRecord, GainerEntry, MilestoneKind, MilestoneRecord, NearMilestoneCandidate,
    Observation, StatsChange,
};

#[async_trait]
pub trait StatsRepository: Send + Sync {
    async fn save_observation(&self, observation: Observation) -> Result<(), RepositoryError>;

    async fn latest_observation(
        &self,
        channel_id: &str,
    ) -> Result<Option<Observation>, RepositoryError>;

    /// Audit-only; failures here are logged and swallowed by callers, never surfaced upward.
    async fn record_change(
        &self,
        before: &Observation,
        after: &Observation,
    ) -> Result<(), RepositoryError>;

    async fn has_achieved_milestone(
        &self,
        channel_id: &str,
        kind: MilestoneKind,
        value: u64,
    ) -> Result<bool, RepositoryError>;

    /// Returns whether a new row was inserted (`false` if the key already existed).
    async fn save_milestone(&self, record: MilestoneRecord) -> Result<bool, RepositoryError>;

    async fn unnotified_milestones(
        &self,
        limit: usize,
    ) -> Result<Vec<MilestoneRecord>, RepositoryError>;

    async fn mark_milestone_notified(
        &self,
        channel_id: &str,
        kind: MilestoneKind,
        value: u64,
    ) -> Result<(), RepositoryError>;

    async fn near_milestone_candidates(
        &self,
        threshold_ratio: f64,
        ladder: &[u64],
        limit: usize,
    ) -> Result<Vec<NearMilestoneCandidate>, RepositoryError>;

    async fn has_approaching_notified(
        &self,
        channel_id: &str,
        milestone_value: u64,
    ) -> Result<bool, RepositoryError>;

    /// Inserts; a duplicate key is silently ignored (this is the at-most-once latch).
    async fn save_approaching_notification(
        &self,
        channel_id: &str,
        display_name: &str,
        milestone_value: u64,
        current_subscribers: u64,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn unnotified_approaching(
        &self,
        limit: usize,
    ) -> Result<Vec<ApproachingRecord>, RepositoryError>;

    async fn mark_approaching_chat_notified(
        &self,
        channel_id: &str,
        milestone_value: u64,
    ) -> Result<(), RepositoryError>;

    /// Operator/reporting helper; never called by the scheduler's own loops.
    async fn top_gainers(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<GainerEntry>, RepositoryError>;
}

/// In-memory implementation backing the test harness and usable standalone for small
/// single-process deployments that don't need Postgres.
pub mod memory {
    use std::collections::HashMap;

    use tokio::sync::RwLock;

    use super::*;

    #[derive(Default)]
    struct State {
        /// Keyed by channel_id; each Vec is append-ordered, latest last.
        history: HashMap<String, Vec<Observation>>,
        changes: Vec<StatsChange>,
        milestones: HashMap<(String, MilestoneKind, u64), MilestoneRecord>,
        approaching: HashMap<(String, u64), ApproachingRecord>,
    }

    #[derive(Default)]
    pub struct InMemoryStatsRepository {
        state: RwLock<State>,
    }

    impl InMemoryStatsRepository {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl StatsRepository for InMemoryStatsRepository {
        async fn save_observation(&self, observation: Observation) -> Result<(), RepositoryError> {
            let mut state = self.state.write().await;
            let rows = state.history.entry(observation.channel_id.clone()).or_default();
            if let Some(existing) =
                rows.iter_mut().find(|o| o.sampled_at == observation.sampled_at)
            {
                *existing = observation;
            } else {
                rows.push(observation);
            }
            Ok(())
        }

        async fn latest_observation(
            &self,
            channel_id: &str,
        ) -> Result<Option<Observation>, RepositoryError> {
            let state = self.state.read().await;
            Ok(state
                .history
                .get(channel_id)
                .and_then(|rows| rows.iter().max_by_key(|o| o.sampled_at).cloned()))
        }

        async fn record_change(
            &self,
            before: &Observation,
            after: &Observation,
        ) -> Result<(), RepositoryError> {
            let mut state = self.state.write().await;
            state.changes.push(StatsChange {
                channel_id: after.channel_id.clone(),
                before_subscribers: before.subscribers,
                after_subscribers: after.subscribers,
                before_videos: before.videos,
                after_videos: after.videos,
                recorded_at: after.sampled_at,
            });
            Ok(())
        }

        async fn has_achieved_milestone(
            &self,
            channel_id: &str,
            kind: MilestoneKind,
            value: u64,
        ) -> Result<bool, RepositoryError> {
            let state = self.state.read().await;
            Ok(state.milestones.contains_key(&(channel_id.to_string(), kind, value)))
        }

        async fn save_milestone(&self, record: MilestoneRecord) -> Result<bool, RepositoryError> {
            let mut state = self.state.write().await;
            let key = (record.channel_id.clone(), record.kind, record.value);
            if state.milestones.contains_key(&key) {
                return Ok(false);
            }
            state.milestones.insert(key, record);
            Ok(true)
        }

        async fn unnotified_milestones(
            &self,
            limit: usize,
        ) -> Result<Vec<MilestoneRecord>, RepositoryError> {
            let state = self.state.read().await;
            let mut rows: Vec<MilestoneRecord> =
                state.milestones.values().filter(|m| !m.notified).cloned().collect();
            rows.sort_by(|a, b| b.achieved_at.cmp(&a.achieved_at));
            rows.truncate(limit);
            Ok(rows)
        }

        async fn mark_milestone_notified(
            &self,
            channel_id: &str,
            kind: MilestoneKind,
            value: u64,
        ) -> Result<(), RepositoryError> {
            let mut state = self.state.write().await;
            if let Some(record) =
                state.milestones.get_mut(&(channel_id.to_string(), kind, value))
            {
                record.notified = true;
            }
            Ok(())
        }

        async fn near_milestone_candidates(
            &self,
            threshold_ratio: f64,
            ladder: &[u64],
            limit: usize,
        ) -> Result<Vec<NearMilestoneCandidate>, RepositoryError> {
            let state = self.state.read().await;
            let mut candidates = Vec::new();
            for (channel_id, rows) in state.history.iter() {
                let Some(latest) = rows.iter().max_by_key(|o| o.sampled_at) else { continue };
                let achieved: Vec<u64> = state
                    .milestones
                    .values()
                    .filter(|m| &m.channel_id == channel_id)
                    .map(|m| m.value)
                    .collect();
                let Some(next_rung) =
                    crate::evaluator::next_unachieved(latest.subscribers, &achieved, ladder)
                else {
                    continue;
                };
                let ratio = crate::evaluator::progress_ratio(latest.subscribers, next_rung);
                if ratio >= threshold_ratio {
                    candidates.push((
                        ratio,
                        NearMilestoneCandidate {
                            channel_id: channel_id.clone(),
                            current_subscribers: latest.subscribers,
                            next_milestone: next_rung,
                        },
                    ));
                }
            }
            candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            let mut out: Vec<NearMilestoneCandidate> =
                candidates.into_iter().map(|(_, c)| c).collect();
            out.truncate(limit);
            Ok(out)
        }

        async fn has_approaching_notified(
            &self,
            channel_id: &str,
            milestone_value: u64,
        ) -> Result<bool, RepositoryError> {
            let state = self.state.read().await;
            Ok(state.approaching.contains_key(&(channel_id.to_string(), milestone_value)))
        }

        async fn save_approaching_notification(
            &self,
            channel_id: &str,
            display_name: &str,
            milestone_value: u64,
            current_subscribers: u64,
            at: DateTime<Utc>,
        ) -> Result<(), RepositoryError> {
            let mut state = self.state.write().await;
            let key = (channel_id.to_string(), milestone_value);
            state.approaching.entry(key).or_insert(ApproachingRecord {
                channel_id: channel_id.to_string(),
                display_name_at_alert: display_name.to_string(),
                milestone_value,
                subscribers_at_alert: current_subscribers,
                created_at: at,
                chat_notified: false,
            });
            Ok(())
        }

        async fn unnotified_approaching(
            &self,
            limit: usize,
        ) -> Result<Vec<ApproachingRecord>, RepositoryError> {
            let state = self.state.read().await;
            let mut rows: Vec<ApproachingRecord> =
                state.approaching.values().filter(|a| !a.chat_notified).cloned().collect();
            rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            rows.truncate(limit);
            Ok(rows)
        }

        async fn mark_approaching_chat_notified(
            &self,
            channel_id: &str,
            milestone_value: u64,
        ) -> Result<(), RepositoryError> {
            let mut state = self.state.write().await;
            if let Some(record) =
                state.approaching.get_mut(&(channel_id.to_string(), milestone_value))
            {
                record.chat_notified = true;
            }
            Ok(())
        }

        async fn top_gainers(
            &self,
            since: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<GainerEntry>, RepositoryError> {
            let state = self.state.read().await;
            let mut entries = Vec::new();
            for (channel_id, rows) in state.history.iter() {
                let in_window: Vec<&Observation> =
                    rows.iter().filter(|o| o.sampled_at >= since).collect();
                let Some(earliest) = in_window.iter().min_by_key(|o| o.sampled_at) else {
                    continue;
                };
                let Some(latest) = in_window.iter().max_by_key(|o| o.sampled_at) else {
                    continue;
                };
                if latest.subscribers > earliest.subscribers {
                    entries.push(GainerEntry {
                        channel_id: channel_id.clone(),
                        display_name: latest.display_name_at_sample.clone(),
                        gained_subscribers: latest.subscribers - earliest.subscribers,
                        from_subscribers: earliest.subscribers,
                        to_subscribers: latest.subscribers,
                    });
                }
            }
            entries.sort_by(|a, b| b.gained_subscribers.cmp(&a.gained_subscribers));
            entries.truncate(limit);
            Ok(entries)
        }
    }
}
