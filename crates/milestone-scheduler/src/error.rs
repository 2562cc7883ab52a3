//! Typed error taxonomy for the milestone scheduler.
//!
//! Errors are split by the collaborator that raised them so callers can decide whether a failure
//! is transient (skip this channel), quota-bound (skip this tick), or fatal (refuse to start).

use thiserror::Error;

/// Top-level error returned by scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Messenger(#[from] MessengerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised by the Clock & Quota Accountant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuotaError {
    #[error("daily quota exceeded: {used} + {requested} > {limit} - {margin}")]
    Exceeded {
        used: i64,
        requested: i64,
        limit: i64,
        margin: i64,
    },
}

/// Errors raised by external API collaborators (Statistics / Discovery clients, Messenger wire
/// transport).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transient failure calling {source_name}: {message}")]
    Transient { source_name: &'static str, message: String },

    #[error("call to {source_name} timed out after {elapsed_ms}ms")]
    Timeout { source_name: &'static str, elapsed_ms: u64 },
}

/// Errors raised by the Stats Repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("failed to read from repository: {message}")]
    Read { message: String },

    #[error("failed to write to repository: {message}")]
    Write { message: String },
}

/// Errors raised by the Messenger Adapter.
#[derive(Debug, Error)]
pub enum MessengerError {
    #[error("failed to send to room {room}: {message}")]
    Send { room: String, message: String },
}

/// Fatal configuration errors, refused at construction time rather than degraded at runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("subscriber ladder must be non-empty")]
    EmptyLadder,

    #[error("subscriber ladder must be strictly increasing, found {prev} >= {next}")]
    NonIncreasingLadder { prev: u64, next: u64 },

    #[error("stats_batch_size must be greater than zero")]
    ZeroBatchSize,

    #[error("channels_per_batch must be greater than zero")]
    ZeroChannelsPerBatch,

    #[error("batches_per_day must be greater than zero")]
    ZeroBatchesPerDay,

    #[error("near_miss_concurrency must be greater than zero")]
    ZeroConcurrency,

    #[error("daily_quota_limit must be greater than quota_safety_margin")]
    MarginExceedsLimit,

    #[error("unknown IANA timezone: {name}")]
    UnknownTimezone { name: String },
}
