//! Fire-and-forget alerts. Delivery never affects recognition.

use std::fmt;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// A face was accepted and the lock signalled open.
    Recognized { name: String },
    /// No accepted match within the configured timeout.
    NoMatchTimeout,
}

impl Alert {
    pub fn kind(&self) -> &'static str {
        match self {
            Alert::Recognized { .. } => "recognized",
            Alert::NoMatchTimeout => "no_match_timeout",
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::Recognized { name } => write!(f, "recognized {name}"),
            Alert::NoMatchTimeout => f.write_str("no match before timeout"),
        }
    }
}

pub trait Notifier: Send + Sync {
    /// Must return promptly; any delivery work happens in the background.
    fn notify(&self, alert: Alert);
}

/// Logs alerts and does nothing else.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, alert: Alert) {
        tracing::info!(kind = alert.kind(), %alert, "alert");
    }
}

/// Spawns an external program per alert: `<command> <kind> [name]`.
///
/// Must be called from within a tokio runtime.
pub struct CommandNotifier {
    program: String,
}

impl CommandNotifier {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, alert: &Alert) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(alert.kind());
        if let Alert::Recognized { name } = alert {
            cmd.arg(name);
        }
        cmd
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, alert: Alert) {
        let mut cmd = self.command(&alert);
        let program = self.program.clone();
        tokio::spawn(async move {
            match cmd.status().await {
                Ok(status) if status.success() => {
                    tracing::debug!(program, kind = alert.kind(), "alert command finished");
                }
                Ok(status) => {
                    tracing::warn!(program, kind = alert.kind(), %status, "alert command failed");
                }
                Err(e) => {
                    tracing::warn!(
                        program,
                        kind = alert.kind(),
                        error = %e,
                        "alert command could not start"
                    );
                }
            }
        });
    }
}
