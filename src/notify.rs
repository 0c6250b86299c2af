use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::error::ErrorKind;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "kind", rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected(ErrorKind),
}

/// What happened to one booking attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingOutcome {
    pub operation: Operation,
    pub resource_id: Ulid,
    /// Absent when a create was rejected before an id existed.
    pub reservation_id: Option<Ulid>,
    pub verdict: Verdict,
}

/// Per-resource broadcast of booking outcomes.
pub struct OutcomeHub {
    channels: DashMap<Ulid, broadcast::Sender<BookingOutcome>>,
}

impl Default for OutcomeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to outcomes for a resource. Creates the channel if needed.
    pub fn subscribe(&self, resource_id: Ulid) -> broadcast::Receiver<BookingOutcome> {
        let sender = self
            .channels
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn publish(&self, outcome: BookingOutcome) {
        if let Some(sender) = self.channels.get(&outcome.resource_id) {
            let _ = sender.send(outcome);
        }
    }

    /// Drop a resource's channel; subscribers see the stream end.
    pub fn remove(&self, resource_id: &Ulid) {
        self.channels.remove(resource_id);
    }
}
