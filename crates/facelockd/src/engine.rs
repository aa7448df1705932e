use crate::config::Config;
use crate::storage::{DirBlobStore, SqliteGallery};
use facelock_core::embedder::{EmbedError, FaceNetEmbedder};
use facelock_core::liveness::MobileNetScorer;
use facelock_core::store::StoreError;
use facelock_core::{
    Coordinator, CoordinatorError, EnrollRequest, FaceDetection, Frame, Identity, Recognition,
    SingleFlight,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model error: {0}")]
    Model(#[from] EmbedError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error("failed to spawn analysis thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot of the analysis lane, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub gallery_size: usize,
    pub gallery_loaded_at: Option<String>,
    pub liveness: bool,
    pub busy: bool,
}

/// Messages sent to the analysis thread.
enum EngineRequest {
    Recognize {
        permit: facelock_core::FlightPermit,
        frame: Frame,
        detections: Vec<FaceDetection>,
        reply: oneshot::Sender<Recognition>,
    },
    Enroll {
        request: EnrollRequest,
        reply: oneshot::Sender<Result<Identity, CoordinatorError>>,
    },
    Remove {
        id: String,
        reply: oneshot::Sender<Result<bool, StoreError>>,
    },
    Clear {
        reply: oneshot::Sender<Result<usize, StoreError>>,
    },
    List {
        reply: oneshot::Sender<Result<Vec<Identity>, StoreError>>,
    },
    Reload {
        reply: oneshot::Sender<Result<usize, StoreError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the analysis thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    flight: SingleFlight,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Submit one frame for recognition against the current gallery snapshot.
    ///
    /// Returns [`Recognition::Busy`] immediately, without queueing, when an
    /// attempt is already in flight.
    pub async fn recognize(
        &self,
        frame: Frame,
        detections: Vec<FaceDetection>,
    ) -> Result<Recognition, EngineError> {
        let Some(permit) = self.flight.try_acquire() else {
            tracing::trace!("analysis lane busy; frame dropped");
            return Ok(Recognition::Busy);
        };
        self.request(|reply| EngineRequest::Recognize {
            permit,
            frame,
            detections,
            reply,
        })
        .await
    }

    /// Enroll a new identity. Queued behind any in-flight work, never dropped.
    pub async fn enroll(&self, request: EnrollRequest) -> Result<Identity, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::Enroll { request, reply })
            .await??)
    }

    pub async fn remove(&self, id: String) -> Result<bool, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::Remove { id, reply })
            .await??)
    }

    pub async fn clear(&self) -> Result<usize, EngineError> {
        Ok(self.request(|reply| EngineRequest::Clear { reply }).await??)
    }

    pub async fn list(&self) -> Result<Vec<Identity>, EngineError> {
        Ok(self.request(|reply| EngineRequest::List { reply }).await??)
    }

    /// Replace the gallery snapshot with a fresh load from the store.
    /// Returns the number of usable entries.
    pub async fn reload(&self) -> Result<usize, EngineError> {
        Ok(self.request(|reply| EngineRequest::Reload { reply }).await??)
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let mut status = self.request(|reply| EngineRequest::Status { reply }).await?;
        status.busy = self.flight.is_busy();
        Ok(status)
    }

    #[cfg(test)]
    pub(crate) fn flight(&self) -> &SingleFlight {
        &self.flight
    }
}

/// Open the stores and load the models named by `config`.
///
/// The embedding model is required. The liveness model is optional: when
/// enabled but missing, the daemon runs without it.
pub fn load_coordinator(config: &Config) -> Result<Coordinator, EngineError> {
    let gallery = Arc::new(SqliteGallery::open(&config.db_path)?);
    let blobs = Arc::new(DirBlobStore::open(&config.blob_dir)?);

    let facenet_path = config.facenet_model_path();
    let embedder = FaceNetEmbedder::load(&facenet_path)?;
    tracing::info!(path = %facenet_path, "FaceNet embedder loaded");

    let mut coordinator =
        Coordinator::new(Box::new(embedder), gallery, blobs, config.recognition());

    if config.liveness_enabled {
        let path = config.mobilenet_model_path();
        match MobileNetScorer::load(&path) {
            Ok(scorer) => {
                tracing::info!(path = %path, "liveness scorer loaded");
                coordinator = coordinator.with_liveness(Box::new(scorer));
            }
            Err(e) => {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "liveness scorer unavailable; continuing without it"
                );
            }
        }
    } else {
        tracing::info!("liveness disabled via FACELOCK_LIVENESS_ENABLED=0");
    }

    Ok(coordinator)
}

/// Spawn the analysis lane on a dedicated OS thread.
///
/// Loads the initial gallery snapshot before returning, so a broken store
/// fails startup.
pub fn spawn_engine(mut coordinator: Coordinator) -> Result<EngineHandle, EngineError> {
    let mut gallery = coordinator.load_gallery()?;
    let flight = coordinator.flight();

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("facelock-analysis".into())
        .spawn(move || {
            tracing::info!(gallery = gallery.len(), "analysis thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Recognize {
                        permit,
                        frame,
                        detections,
                        reply,
                    } => {
                        let result = coordinator.recognize(permit, &gallery, &frame, &detections);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Enroll { request, reply } => {
                        let _ = reply.send(coordinator.enroll(request));
                    }
                    EngineRequest::Remove { id, reply } => {
                        let _ = reply.send(coordinator.remove(&id));
                    }
                    EngineRequest::Clear { reply } => {
                        let _ = reply.send(coordinator.clear());
                    }
                    EngineRequest::List { reply } => {
                        let _ = reply.send(coordinator.list());
                    }
                    EngineRequest::Reload { reply } => {
                        let result = coordinator.load_gallery().map(|fresh| {
                            gallery = fresh;
                            gallery.len()
                        });
                        let _ = reply.send(result);
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(EngineStatus {
                            gallery_size: gallery.len(),
                            gallery_loaded_at: gallery.loaded_at().map(str::to_owned),
                            liveness: coordinator.has_liveness(),
                            busy: false,
                        });
                    }
                }
            }
            tracing::info!("analysis thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, flight })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{engine, face_box, frame_with, BLUE, RED};
    use facelock_core::EnrollRejection;

    fn enroll_request(name: &str, color: [u8; 3]) -> EnrollRequest {
        EnrollRequest {
            name: name.into(),
            frame: frame_with(color),
            detections: vec![face_box()],
        }
    }

    #[tokio::test]
    async fn test_snapshot_changes_only_on_reload() {
        let engine = engine();
        let ana = engine.enroll(enroll_request("ana", RED)).await.unwrap();

        let before = engine.recognize(frame_with(RED), vec![face_box()]).await.unwrap();
        assert!(before.accepted().is_none());

        assert_eq!(engine.reload().await.unwrap(), 1);
        let after = engine.recognize(frame_with(RED), vec![face_box()]).await.unwrap();
        let decision = after.accepted().expect("match after reload");
        assert_eq!(decision.identity.as_ref(), Some(&ana));
    }

    #[tokio::test]
    async fn test_busy_frame_is_dropped_not_queued() {
        let engine = engine();
        let held = engine.flight().try_acquire().unwrap();
        let result = engine.recognize(frame_with(RED), vec![face_box()]).await.unwrap();
        assert!(matches!(result, Recognition::Busy));

        drop(held);
        let result = engine.recognize(frame_with(RED), vec![face_box()]).await.unwrap();
        assert!(matches!(result, Recognition::Decided(_)));
        assert!(!engine.flight().is_busy());
    }

    #[tokio::test]
    async fn test_enrollment_queued_while_busy() {
        let engine = engine();
        let _held = engine.flight().try_acquire().unwrap();
        let identity = engine.enroll(enroll_request("ana", RED)).await.unwrap();
        assert_eq!(identity.name, "ana");
    }

    #[tokio::test]
    async fn test_enroll_rejection_surfaces() {
        let engine = engine();
        engine.enroll(enroll_request("ana", RED)).await.unwrap();
        let err = engine.enroll(enroll_request("ana", BLUE)).await.unwrap_err();
        match err {
            EngineError::Coordinator(e) => {
                assert_eq!(e.rejection(), Some(EnrollRejection::NameAlreadyExists))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_remove_clear() {
        let engine = engine();
        let ana = engine.enroll(enroll_request("ana", RED)).await.unwrap();
        engine.enroll(enroll_request("bia", BLUE)).await.unwrap();
        assert_eq!(engine.list().await.unwrap().len(), 2);

        assert!(engine.remove(ana.id.clone()).await.unwrap());
        assert!(!engine.remove(ana.id).await.unwrap());
        assert_eq!(engine.clear().await.unwrap(), 1);
        assert!(engine.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_reports_snapshot() {
        let engine = engine();
        engine.enroll(enroll_request("ana", RED)).await.unwrap();
        engine.reload().await.unwrap();
        let status = engine.status().await.unwrap();
        assert_eq!(status.gallery_size, 1);
        assert!(status.gallery_loaded_at.is_some());
        assert!(!status.liveness);
        assert!(!status.busy);
    }
}
