//! Lock-controller signals and the access-log stream.
//!
//! Both are plain last-write-wins shared state; the daemon is the only
//! controlling client.

use facelock_core::access_log::LogEntry;
use std::sync::Mutex;
use tokio::sync::watch;

/// The two boolean keys shared with the lock hardware.
pub trait LockSignal: Send + Sync {
    /// Write `shouldOpenLock`.
    fn set_should_open(&self, open: bool);
    fn should_open(&self) -> bool;
    /// Set `shouldOpenLock` only if it is clear. Returns whether this call set it.
    fn open_if_closed(&self) -> bool;
    /// Push-based view of `doorIsOpen`.
    fn door(&self) -> watch::Receiver<bool>;
}

/// Append-only access log.
pub trait LogStream: Send + Sync {
    fn push(&self, entry: LogEntry);
    /// Every entry pushed so far, oldest first.
    fn snapshot(&self) -> Vec<LogEntry>;
}

/// In-process signals backed by `watch` channels.
pub struct LocalSignals {
    should_open: watch::Sender<bool>,
    door: watch::Sender<bool>,
}

impl LocalSignals {
    pub fn new() -> Self {
        Self {
            should_open: watch::Sender::new(false),
            door: watch::Sender::new(false),
        }
    }

    /// Feed a door-sensor reading.
    pub fn report_door(&self, open: bool) {
        let previous = self.door.send_replace(open);
        if previous != open {
            tracing::debug!(open, "door state changed");
        }
    }
}

impl Default for LocalSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl LockSignal for LocalSignals {
    fn set_should_open(&self, open: bool) {
        self.should_open.send_replace(open);
        tracing::info!(should_open = open, "lock signal written");
    }

    fn should_open(&self) -> bool {
        *self.should_open.borrow()
    }

    fn open_if_closed(&self) -> bool {
        let opened = self.should_open.send_if_modified(|open| !std::mem::replace(open, true));
        if opened {
            tracing::info!(should_open = true, "lock signal written");
        }
        opened
    }

    fn door(&self) -> watch::Receiver<bool> {
        self.door.subscribe()
    }
}

/// In-memory log. Followers poll [`LogStream::snapshot`] and dedup client-side.
#[derive(Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStream for MemoryLog {
    fn push(&self, entry: LogEntry) {
        tracing::info!(name = %entry.name, timestamp = %entry.timestamp, "access log entry");
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(_) => tracing::error!("access log mutex poisoned; entry not stored"),
        }
    }

    fn snapshot(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_signal_last_write_wins() {
        let signals = LocalSignals::new();
        assert!(!signals.should_open());
        signals.set_should_open(true);
        signals.set_should_open(false);
        signals.set_should_open(true);
        assert!(signals.should_open());
    }

    #[test]
    fn test_open_if_closed_only_once() {
        let signals = LocalSignals::new();
        assert!(signals.open_if_closed());
        assert!(!signals.open_if_closed());
        assert!(signals.should_open());
        signals.set_should_open(false);
        assert!(signals.open_if_closed());
    }

    #[tokio::test]
    async fn test_door_subscription_sees_changes() {
        let signals = LocalSignals::new();
        let mut door = signals.door();
        signals.report_door(true);
        door.changed().await.unwrap();
        assert!(*door.borrow_and_update());
    }

    #[test]
    fn test_log_snapshot_keeps_order() {
        let log = MemoryLog::new();
        log.push(LogEntry::door_closed());
        log.push(LogEntry::recognized(&facelock_core::Identity::new("ana")));
        let names: Vec<_> = log.snapshot().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["Door Closed", "ana"]);
    }
}
