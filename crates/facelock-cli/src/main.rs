use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facelock_core::access_log::{LogEntry, LogFeed};
use facelock_core::Identity;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[zbus::proxy(
    interface = "org.facelock.Daemon1",
    default_service = "org.facelock.Daemon1",
    default_path = "/org/facelock/Daemon1"
)]
trait Daemon {
    async fn enroll(
        &self,
        name: &str,
        image_path: &str,
        detections_json: &str,
        front_camera: bool,
        rotation: u32,
    ) -> zbus::Result<String>;
    async fn recognize(
        &self,
        image_path: &str,
        detections_json: &str,
        front_camera: bool,
        rotation: u32,
    ) -> zbus::Result<String>;
    async fn list_faces(&self) -> zbus::Result<String>;
    async fn remove_face(&self, id: &str) -> zbus::Result<bool>;
    async fn clear_faces(&self) -> zbus::Result<u32>;
    async fn reload_gallery(&self) -> zbus::Result<u32>;
    async fn release_lock(&self) -> zbus::Result<()>;
    async fn report_door(&self, open: bool) -> zbus::Result<()>;
    async fn logs(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facelock", about = "facelock face-recognition lock CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// A captured frame plus the detector output for it.
#[derive(clap::Args)]
struct FrameArgs {
    /// Image file (PNG or JPEG) as captured
    image: PathBuf,
    /// JSON file with the face detections for the image
    #[arg(short, long)]
    detections: PathBuf,
    /// Frame came from the front-facing camera (mirrored before matching)
    #[arg(long)]
    front: bool,
    /// Clockwise rotation needed to bring the image upright
    #[arg(long, default_value_t = 0)]
    rotation: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new face. Recognition keeps matching against its current
    /// gallery until it is reloaded.
    Enroll {
        /// Name to enroll under (must be unique)
        #[arg(short, long)]
        name: String,
        /// Reload the recognition gallery after enrolling
        #[arg(long)]
        reload: bool,
        #[command(flatten)]
        frame: FrameArgs,
    },
    /// Recognize the face in a frame
    Recognize {
        #[command(flatten)]
        frame: FrameArgs,
    },
    /// List enrolled faces
    List,
    /// Remove an enrolled face
    Remove {
        /// Identity ID to remove
        id: String,
    },
    /// Remove every enrolled face
    Clear,
    /// Reload the gallery used for recognition
    Reload,
    /// Close the lock and resume recognition
    Release,
    /// Report a door-sensor reading
    Door {
        #[arg(value_parser = ["open", "closed"])]
        state: String,
    },
    /// Show the access log
    Logs {
        /// Keep polling and print new entries as they arrive
        #[arg(short, long)]
        follow: bool,
    },
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session()
        .await
        .context("cannot connect to the session bus")?;
    let daemon = DaemonProxy::new(&conn)
        .await
        .context("facelockd is not reachable")?;

    match cli.command {
        Commands::Enroll {
            name,
            reload,
            frame,
        } => {
            let (image, detections) = read_frame(&frame)?;
            let id = daemon
                .enroll(&name, &image, &detections, frame.front, frame.rotation)
                .await
                .map_err(daemon_error)?;
            println!("Enrolled {name} ({id})");
            if reload {
                let entries = daemon.reload_gallery().await?;
                println!("Gallery reloaded: {entries} face(s)");
            }
        }
        Commands::Recognize { frame } => {
            let (image, detections) = read_frame(&frame)?;
            let json = daemon
                .recognize(&image, &detections, frame.front, frame.rotation)
                .await
                .map_err(daemon_error)?;
            let outcome: serde_json::Value = serde_json::from_str(&json)?;
            println!("{}", describe_outcome(&outcome));
        }
        Commands::List => {
            let identities: Vec<Identity> = serde_json::from_str(&daemon.list_faces().await?)?;
            if identities.is_empty() {
                println!("No faces enrolled");
            }
            for identity in identities {
                println!("{}  {}  {}", identity.id, identity.created_at, identity.name);
            }
        }
        Commands::Remove { id } => {
            if daemon.remove_face(&id).await? {
                println!("Removed {id}");
            } else {
                println!("No face with id {id}");
            }
        }
        Commands::Clear => {
            let removed = daemon.clear_faces().await?;
            println!("Removed {removed} face(s)");
        }
        Commands::Reload => {
            let entries = daemon.reload_gallery().await?;
            println!("Gallery reloaded: {entries} face(s)");
        }
        Commands::Release => {
            daemon.release_lock().await?;
            println!("Lock released");
        }
        Commands::Door { state } => {
            daemon.report_door(state == "open").await?;
        }
        Commands::Logs { follow } => {
            let mut feed = LogFeed::new();
            loop {
                let snapshot: Vec<LogEntry> = serde_json::from_str(&daemon.logs().await?)?;
                for entry in feed.absorb(snapshot) {
                    println!("{}  {}", entry.timestamp, entry.name);
                }
                if !follow {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
        Commands::Status => {
            let status: serde_json::Value = serde_json::from_str(&daemon.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

/// Absolute image path (the daemon resolves it) and the detections JSON.
fn read_frame(frame: &FrameArgs) -> Result<(String, String)> {
    let image = absolute(&frame.image)?;
    let detections = std::fs::read_to_string(&frame.detections)
        .with_context(|| format!("cannot read {}", frame.detections.display()))?;
    Ok((image, detections))
}

fn absolute(path: &Path) -> Result<String> {
    let path = std::fs::canonicalize(path)
        .with_context(|| format!("cannot resolve {}", path.display()))?;
    Ok(path.to_string_lossy().into_owned())
}

/// Unwrap D-Bus method errors to the daemon's message.
fn daemon_error(e: zbus::Error) -> anyhow::Error {
    match e {
        zbus::Error::MethodError(_, Some(msg), _) => anyhow::anyhow!(msg),
        other => other.into(),
    }
}

fn describe_outcome(outcome: &serde_json::Value) -> String {
    let name = outcome["identity"]["name"].as_str().unwrap_or("unknown");
    match outcome["status"].as_str() {
        Some("decided") if outcome["matched"].as_bool() == Some(true) => format!(
            "Recognized {name} (similarity {:.3})",
            outcome["similarity"].as_f64().unwrap_or_default()
        ),
        Some("decided") if outcome["identity"].is_null() => "No faces enrolled".to_string(),
        Some("decided") => format!(
            "Not recognized (closest: {name}, similarity {:.3})",
            outcome["similarity"].as_f64().unwrap_or_default()
        ),
        Some("no_decision") => format!(
            "No decision at {}: {}",
            outcome["stage"].as_str().unwrap_or("?"),
            outcome["reason"].as_str().unwrap_or("")
        ),
        Some("busy") => "Busy: another recognition is in flight".to_string(),
        Some("ignored") => "Lock is open; frame ignored".to_string(),
        _ => outcome.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe_outcome() {
        let matched = json!({
            "status": "decided", "matched": true,
            "identity": {"id": "1", "name": "ana", "created_at": "x"},
            "similarity": 0.93
        });
        assert_eq!(describe_outcome(&matched), "Recognized ana (similarity 0.930)");

        let empty = json!({"status": "decided", "matched": false, "identity": null});
        assert_eq!(describe_outcome(&empty), "No faces enrolled");

        let failed = json!({"status": "no_decision", "stage": "aligning", "reason": "empty crop"});
        assert_eq!(describe_outcome(&failed), "No decision at aligning: empty crop");
    }

    #[test]
    fn test_cli_parses_frame_args() {
        let cli = Cli::try_parse_from([
            "facelock", "enroll", "--name", "ana", "frame.png", "-d", "dets.json", "--front",
            "--rotation", "270",
        ])
        .unwrap();
        match cli.command {
            Commands::Enroll {
                name,
                reload,
                frame,
            } => {
                assert_eq!(name, "ana");
                assert!(!reload);
                assert!(frame.front);
                assert_eq!(frame.rotation, 270);
            }
            _ => panic!("expected enroll"),
        }
    }

    #[test]
    fn test_enroll_reload_is_opt_in() {
        let cli = Cli::try_parse_from([
            "facelock", "enroll", "-n", "ana", "frame.png", "-d", "dets.json", "--reload",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Enroll { reload: true, .. }));
    }
}
