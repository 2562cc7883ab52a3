//! In-memory fakes for every collaborator trait.
//!
//! These hold real state behind a lock and implement the real trait, rather than recording call
//! expectations ("fake over mock"). Compiled unconditionally (not `cfg(test)`-gated) so embedders
//! can reuse them for their own integration tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::discovery_client::DiscoveryClient;
use crate::error::{MessengerError, TransportError};
use crate::messenger::Messenger;
use crate::model::Snapshot;
use crate::stats_client::RawStatisticsTransport;

pub use crate::cache::memory::InMemoryStatsCache;
pub use crate::registry::StaticChannelRegistry;
pub use crate::repository::memory::InMemoryStatsRepository;

/// A scripted `RawStatisticsTransport`: each channel id maps to either a `Snapshot` or a
/// scripted failure, set up before the test runs.
#[derive(Default)]
pub struct FakeStatisticsTransport {
    snapshots: Mutex<HashMap<String, Snapshot>>,
    fail_ids: Mutex<std::collections::HashSet<String>>,
}

impl FakeStatisticsTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_snapshot(&self, snapshot: Snapshot) {
        self.snapshots.lock().unwrap().insert(snapshot.channel_id.clone(), snapshot);
    }

    pub fn fail_channel(&self, channel_id: &str) {
        self.fail_ids.lock().unwrap().insert(channel_id.to_string());
    }
}

#[async_trait]
impl RawStatisticsTransport for FakeStatisticsTransport {
    async fn fetch_batch(
        &self,
        channel_ids: &[String],
    ) -> Result<HashMap<String, Snapshot>, TransportError> {
        let fail_ids = self.fail_ids.lock().unwrap();
        if channel_ids.iter().any(|id| fail_ids.contains(id)) {
            return Err(TransportError::Transient {
                source_name: "fake-stats",
                message: "scripted failure".into(),
            });
        }
        drop(fail_ids);

        let snapshots = self.snapshots.lock().unwrap();
        Ok(channel_ids
            .iter()
            .filter_map(|id| snapshots.get(id).cloned().map(|s| (id.clone(), s)))
            .collect())
    }
}

/// A scripted `DiscoveryClient`.
#[derive(Default)]
pub struct FakeDiscoveryClient {
    snapshots: Mutex<HashMap<String, Snapshot>>,
}

impl FakeDiscoveryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_snapshot(&self, snapshot: Snapshot) {
        self.snapshots.lock().unwrap().insert(snapshot.channel_id.clone(), snapshot);
    }
}

#[async_trait]
impl DiscoveryClient for FakeDiscoveryClient {
    async fn fetch_channel(&self, channel_id: &str) -> Result<Option<Snapshot>, TransportError> {
        Ok(self.snapshots.lock().unwrap().get(channel_id).cloned())
    }
}

/// Records every sent message behind a mutex; rooms are fixed at construction.
pub struct FakeMessenger {
    rooms: Vec<String>,
    sent: Mutex<Vec<(String, String)>>,
    fail_rooms: Mutex<std::collections::HashSet<String>>,
}

impl FakeMessenger {
    pub fn new(rooms: Vec<String>) -> Self {
        Self { rooms, sent: Mutex::new(Vec::new()), fail_rooms: Mutex::new(Default::default()) }
    }

    pub fn fail_room(&self, room: &str) {
        self.fail_rooms.lock().unwrap().insert(room.to_string());
    }

    pub fn recover_room(&self, room: &str) {
        self.fail_rooms.lock().unwrap().remove(room);
    }

    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn send(&self, room: &str, message: &str) -> Result<(), MessengerError> {
        if self.fail_rooms.lock().unwrap().contains(room) {
            return Err(MessengerError::Send {
                room: room.to_string(),
                message: "scripted failure".into(),
            });
        }
        self.sent.lock().unwrap().push((room.to_string(), message.to_string()));
        Ok(())
    }

    async fn distinct_rooms(&self) -> Vec<String> {
        self.rooms.clone()
    }
}
