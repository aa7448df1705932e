use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod notify;
mod session;
mod signals;
mod storage;
#[cfg(test)]
mod test_support;

use config::Config;
use dbus_interface::{FacelockService, BUS_NAME, OBJECT_PATH};
use notify::{CommandNotifier, Notifier, TracingNotifier};
use session::Session;
use signals::{LocalSignals, MemoryLog};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facelockd starting");

    let config = Config::from_env();
    tracing::info!(
        models = %config.model_dir.display(),
        db = %config.db_path.display(),
        blobs = %config.blob_dir.display(),
        threshold = config.similarity_threshold,
        "configuration loaded"
    );

    let coordinator = engine::load_coordinator(&config)?;
    let engine = engine::spawn_engine(coordinator)?;

    let notifier: Arc<dyn Notifier> = match &config.alert_command {
        Some(program) => {
            tracing::info!(program = %program, "alerts delivered via command");
            Arc::new(CommandNotifier::new(program.clone()))
        }
        None => Arc::new(TracingNotifier),
    };

    let signals = Arc::new(LocalSignals::new());
    let log = Arc::new(MemoryLog::new());
    let session = Arc::new(Session::start(
        engine,
        signals.clone(),
        log,
        notifier,
        config.match_timeout(),
    ));

    let service = FacelockService::new(session, signals);
    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "facelockd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facelockd shutting down");

    Ok(())
}
