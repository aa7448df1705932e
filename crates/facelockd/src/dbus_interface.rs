use crate::engine::EngineError;
use crate::session::Session;
use crate::signals::LocalSignals;
use facelock_core::frame::decode_image;
use facelock_core::{EnrollRequest, FaceDetection, Frame, LensFacing, Recognition};
use serde_json::{json, Value};
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.facelock.Daemon1";
pub const OBJECT_PATH: &str = "/org/facelock/Daemon1";

/// D-Bus interface for the facelock daemon.
///
/// Bus name: org.facelock.Daemon1
/// Object path: /org/facelock/Daemon1
///
/// Frames are passed by path to an image file readable by the daemon, with
/// the detector's output as a JSON array of face detections in upright
/// coordinates.
pub struct FacelockService {
    session: Arc<Session>,
    signals: Arc<LocalSignals>,
}

impl FacelockService {
    pub fn new(session: Arc<Session>, signals: Arc<LocalSignals>) -> Self {
        Self { session, signals }
    }
}

#[interface(name = "org.facelock.Daemon1")]
impl FacelockService {
    /// Enroll a new identity from one frame. Returns the new identity id.
    async fn enroll(
        &self,
        name: &str,
        image_path: &str,
        detections_json: &str,
        front_camera: bool,
        rotation: u32,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(name, image_path, "enroll requested");
        let frame = load_frame(image_path, front_camera, rotation).await?;
        let detections = parse_detections(detections_json)?;

        let identity = self
            .session
            .engine()
            .enroll(EnrollRequest {
                name: name.to_string(),
                frame,
                detections,
            })
            .await
            .map_err(to_fdo)?;
        Ok(identity.id)
    }

    /// Run one recognition attempt. Returns a JSON outcome.
    async fn recognize(
        &self,
        image_path: &str,
        detections_json: &str,
        front_camera: bool,
        rotation: u32,
    ) -> zbus::fdo::Result<String> {
        let frame = load_frame(image_path, front_camera, rotation).await?;
        let detections = parse_detections(detections_json)?;
        let outcome = self
            .session
            .submit(frame, detections)
            .await
            .map_err(to_fdo)?;
        Ok(recognition_json(outcome.as_ref()).to_string())
    }

    /// List enrolled identities as a JSON array.
    async fn list_faces(&self) -> zbus::fdo::Result<String> {
        let identities = self.session.engine().list().await.map_err(to_fdo)?;
        serde_json::to_string(&identities).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Remove an identity and its images. Returns false for an unknown id.
    async fn remove_face(&self, id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(id, "remove requested");
        self.session
            .engine()
            .remove(id.to_string())
            .await
            .map_err(to_fdo)
    }

    /// Remove every identity. Returns the number removed.
    async fn clear_faces(&self) -> zbus::fdo::Result<u32> {
        tracing::info!("clear requested");
        let removed = self.session.engine().clear().await.map_err(to_fdo)?;
        Ok(removed as u32)
    }

    /// Reload the gallery snapshot used for recognition.
    async fn reload_gallery(&self) -> zbus::fdo::Result<u32> {
        let entries = self.session.engine().reload().await.map_err(to_fdo)?;
        Ok(entries as u32)
    }

    async fn release_lock(&self) -> zbus::fdo::Result<()> {
        self.session.release_lock();
        Ok(())
    }

    /// Feed a door-sensor reading.
    async fn report_door(&self, open: bool) -> zbus::fdo::Result<()> {
        self.signals.report_door(open);
        Ok(())
    }

    /// Access log as a JSON array, oldest first.
    async fn logs(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.session.logs())
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let engine = self.session.engine().status().await.map_err(to_fdo)?;
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "gallery_size": engine.gallery_size,
            "gallery_loaded_at": engine.gallery_loaded_at,
            "liveness": engine.liveness,
            "busy": engine.busy,
            "lock_open": self.session.lock_open(),
        })
        .to_string())
    }
}

fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    match &e {
        // Rejections carry the user-facing message verbatim.
        EngineError::Coordinator(inner) if inner.rejection().is_some() => {
            zbus::fdo::Error::Failed(inner.to_string())
        }
        _ => {
            tracing::error!(error = %e, "request failed");
            zbus::fdo::Error::Failed(e.to_string())
        }
    }
}

async fn load_frame(path: &str, front_camera: bool, rotation: u32) -> zbus::fdo::Result<Frame> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("cannot read {path}: {e}")))?;
    let image = decode_image(&bytes)
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("cannot decode {path}: {e}")))?;
    let lens = if front_camera {
        LensFacing::Front
    } else {
        LensFacing::Back
    };
    Ok(Frame::new(image, rotation, lens))
}

fn parse_detections(json: &str) -> zbus::fdo::Result<Vec<FaceDetection>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json)
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("invalid detections: {e}")))
}

/// JSON shape returned by `Recognize`. `None` means the frame was ignored.
fn recognition_json(outcome: Option<&Recognition>) -> Value {
    match outcome {
        None => json!({ "status": "ignored" }),
        Some(Recognition::Busy) => json!({ "status": "busy" }),
        Some(Recognition::NoDecision { stage, reason }) => json!({
            "status": "no_decision",
            "stage": stage.to_string(),
            "reason": reason,
        }),
        Some(Recognition::Decided(d)) => json!({
            "status": "decided",
            "matched": d.matches_criteria,
            "identity": d.identity,
            "distance": d.distance,
            "similarity": d.similarity,
            "liveness": d.liveness,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{frame_with, RED};
    use facelock_core::frame::encode_png;
    use facelock_core::Stage;

    #[test]
    fn test_parse_detections() {
        assert!(parse_detections("").unwrap().is_empty());
        let dets = parse_detections(
            r#"[{"bbox":{"x":1.0,"y":2.0,"width":3.0,"height":4.0},
                "landmarks":{"left_eye":{"x":1.5,"y":2.5}}}]"#,
        )
        .unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox.area(), 12.0);
        assert!(dets[0].landmark(facelock_core::LandmarkKind::LeftEye).is_some());
        assert!(matches!(
            parse_detections("{not json"),
            Err(zbus::fdo::Error::InvalidArgs(_))
        ));
    }

    #[test]
    fn test_recognition_json_shapes() {
        assert_eq!(recognition_json(None)["status"], "ignored");
        assert_eq!(recognition_json(Some(&Recognition::Busy))["status"], "busy");

        let v = recognition_json(Some(&Recognition::NoDecision {
            stage: Stage::Embedding,
            reason: "boom".into(),
        }));
        assert_eq!(v["stage"], "embedding");
        assert_eq!(v["reason"], "boom");
    }

    #[tokio::test]
    async fn test_load_frame_from_png() {
        let path =
            std::env::temp_dir().join(format!("facelock-frame-{}.png", uuid::Uuid::new_v4()));
        std::fs::write(&path, encode_png(&frame_with(RED).image).unwrap()).unwrap();

        let frame = load_frame(path.to_str().unwrap(), true, 90).await.unwrap();
        assert_eq!(frame.lens_facing, LensFacing::Front);
        assert_eq!(frame.rotation_degrees, 90);
        assert_eq!(frame.image.dimensions(), (100, 100));
        std::fs::remove_file(path).unwrap();

        assert!(matches!(
            load_frame("/nonexistent/frame.png", false, 0).await,
            Err(zbus::fdo::Error::InvalidArgs(_))
        ));
    }
}
