//! Recognition session: turns accepted matches into lock and log actions.
//!
//! A session owns two background tasks. The door watcher logs a "Door Closed"
//! entry on every open→closed transition. The watchdog raises
//! [`Alert::NoMatchTimeout`] when no match has been accepted within the
//! configured timeout, then re-arms.

use crate::engine::{EngineError, EngineHandle};
use crate::notify::{Alert, Notifier};
use crate::signals::{LockSignal, LogStream};
use facelock_core::access_log::LogEntry;
use facelock_core::{FaceDetection, Frame, Identity, Recognition};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

pub struct Session {
    engine: EngineHandle,
    signals: Arc<dyn LockSignal>,
    log: Arc<dyn LogStream>,
    notifier: Arc<dyn Notifier>,
    door_was_open: Arc<AtomicBool>,
    watchdog_reset: Arc<Notify>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Start a session and its background tasks. Must be called within a tokio runtime.
    pub fn start(
        engine: EngineHandle,
        signals: Arc<dyn LockSignal>,
        log: Arc<dyn LogStream>,
        notifier: Arc<dyn Notifier>,
        match_timeout: Duration,
    ) -> Self {
        let door_was_open = Arc::new(AtomicBool::new(false));
        let watchdog_reset = Arc::new(Notify::new());

        let door = spawn_door_watcher(signals.door(), door_was_open.clone(), log.clone());
        let watchdog = spawn_watchdog(
            match_timeout,
            watchdog_reset.clone(),
            signals.clone(),
            notifier.clone(),
        );

        Self {
            engine,
            signals,
            log,
            notifier,
            door_was_open,
            watchdog_reset,
            tasks: vec![door, watchdog],
        }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Submit one frame.
    ///
    /// Returns `Ok(None)` while the lock is held open: the camera is
    /// considered unbound and frames are ignored until [`release_lock`](Self::release_lock).
    pub async fn submit(
        &self,
        frame: Frame,
        detections: Vec<FaceDetection>,
    ) -> Result<Option<Recognition>, EngineError> {
        if self.signals.should_open() {
            tracing::trace!("lock held open; frame ignored");
            return Ok(None);
        }

        let recognition = self.engine.recognize(frame, detections).await?;
        if let Some(identity) = recognition.accepted().and_then(|d| d.identity.as_ref()) {
            self.record_match(identity);
        }
        Ok(Some(recognition))
    }

    /// Open the lock for an accepted identity. A match that lands after the
    /// lock was already opened is dropped. Returns whether the lock was opened.
    fn record_match(&self, identity: &Identity) -> bool {
        if !self.signals.open_if_closed() {
            tracing::debug!(
                id = %identity.id,
                name = %identity.name,
                "lock already open; match dropped"
            );
            return false;
        }
        tracing::info!(id = %identity.id, name = %identity.name, "face accepted; lock opened");
        self.door_was_open.store(true, Ordering::SeqCst);
        self.log.push(LogEntry::recognized(identity));
        self.watchdog_reset.notify_one();
        self.notifier.notify(Alert::Recognized {
            name: identity.name.clone(),
        });
        true
    }

    /// Clear `shouldOpenLock` and resume accepting frames.
    pub fn release_lock(&self) {
        self.signals.set_should_open(false);
        self.watchdog_reset.notify_one();
    }

    pub fn lock_open(&self) -> bool {
        self.signals.should_open()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.log.snapshot()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn spawn_door_watcher(
    mut door: watch::Receiver<bool>,
    was_open: Arc<AtomicBool>,
    log: Arc<dyn LogStream>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while door.changed().await.is_ok() {
            let open = *door.borrow_and_update();
            let previously = was_open.swap(open, Ordering::SeqCst);
            if previously && !open {
                log.push(LogEntry::door_closed());
            }
        }
        tracing::debug!("door signal closed; watcher exiting");
    })
}

fn spawn_watchdog(
    timeout: Duration,
    reset: Arc<Notify>,
    signals: Arc<dyn LockSignal>,
    notifier: Arc<dyn Notifier>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    // The camera is unbound while the lock is open.
                    if !signals.should_open() {
                        tracing::warn!(timeout_secs = timeout.as_secs(), "no match before timeout");
                        notifier.notify(Alert::NoMatchTimeout);
                    }
                }
                _ = reset.notified() => {
                    tracing::trace!("match watchdog reset");
                }
            }
        }
    })
}
