//! Core data model shared across the registry, storage, cache, and upstream client boundaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked channel, as returned by the channel registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: String,
    pub display_name: String,
    pub graduated: bool,
}

/// A single fetched reading from either the Statistics or Discovery API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub channel_id: String,
    pub display_name: String,
    pub subscribers: u64,
    pub videos: u64,
    pub views: u64,
}

/// A persisted time-series row. Primary key is `(sampled_at, channel_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub channel_id: String,
    pub display_name_at_sample: String,
    pub subscribers: u64,
    pub videos: u64,
    pub views: u64,
    pub sampled_at: DateTime<Utc>,
}

/// The kind of milestone tracked. Only subscriber milestones exist today; the variant is kept
/// open so a future video/view ladder can share the same table shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MilestoneKind {
    Subscribers,
}

/// A crossed-and-persisted milestone. Unique key is `(channel_id, kind, value)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneRecord {
    pub channel_id: String,
    pub kind: MilestoneKind,
    pub value: u64,
    pub display_name_at_achievement: String,
    pub achieved_at: DateTime<Utc>,
    pub notified: bool,
}

/// A near-milestone alert already raised for `(channel_id, milestone_value)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproachingRecord {
    pub channel_id: String,
    pub display_name_at_alert: String,
    pub milestone_value: u64,
    pub subscribers_at_alert: u64,
    pub created_at: DateTime<Utc>,
    pub chat_notified: bool,
}

/// Append-only audit row; never read back by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsChange {
    pub channel_id: String,
    pub before_subscribers: u64,
    pub after_subscribers: u64,
    pub before_videos: u64,
    pub after_videos: u64,
    pub recorded_at: DateTime<Utc>,
}

/// A candidate surfaced by `StatsRepository::near_milestone_candidates`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NearMilestoneCandidate {
    pub channel_id: String,
    pub current_subscribers: u64,
    pub next_milestone: u64,
}

/// A ranked entry from `StatsRepository::top_gainers`. Exposed for operator tooling; the
/// scheduler's own loops never call the operation that produces this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GainerEntry {
    pub channel_id: String,
    pub display_name: String,
    pub gained_subscribers: u64,
    pub from_subscribers: u64,
    pub to_subscribers: u64,
}
