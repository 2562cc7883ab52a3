//! Delivers formatted messages to distinct chat rooms.
//!
//! Per-room retries are the dispatcher's responsibility, not the adapter's. A failed `send`
//! simply leaves the originating notification row unmarked so the next dispatcher pass retries.

use async_trait::async_trait;

use crate::error::MessengerError;

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, room: &str, message: &str) -> Result<(), MessengerError>;
    async fn distinct_rooms(&self) -> Vec<String>;
}
