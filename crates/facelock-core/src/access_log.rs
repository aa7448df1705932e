//! Access-log records and client-side deduplicating feed.

use crate::types::{now_timestamp, Identity};
use serde::{Deserialize, Serialize};

/// Name recorded when the door reports an open→closed transition.
pub const DOOR_CLOSED: &str = "Door Closed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Identity id for recognition entries; `None` for door events.
    pub id: Option<String>,
    pub name: String,
    pub timestamp: String,
}

impl LogEntry {
    /// Entry for an accepted recognition of `identity`, stamped now.
    pub fn recognized(identity: &Identity) -> Self {
        Self {
            id: Some(identity.id.clone()),
            name: identity.name.clone(),
            timestamp: now_timestamp(),
        }
    }

    pub fn door_closed() -> Self {
        Self {
            id: None,
            name: DOOR_CLOSED.to_string(),
            timestamp: now_timestamp(),
        }
    }
}

/// Accumulates entries seen across repeated snapshots of the remote log.
#[derive(Debug, Default)]
pub struct LogFeed {
    seen: Vec<LogEntry>,
}

impl LogFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append entries not seen before and return just those, in snapshot order.
    pub fn absorb(&mut self, snapshot: impl IntoIterator<Item = LogEntry>) -> Vec<LogEntry> {
        let mut fresh = Vec::new();
        for entry in snapshot {
            if !self.seen.contains(&entry) {
                self.seen.push(entry.clone());
                fresh.push(entry);
            }
        }
        fresh
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.seen
    }
}
