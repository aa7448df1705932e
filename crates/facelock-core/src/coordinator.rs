//! Recognition coordinator.
//!
//! Runs one recognition attempt end-to-end (select the primary face, crop,
//! mirror, align, embed, rank, decide), enrolls new identities and keeps
//! stored records and image blobs in step.

use crate::alignment::{self, DEFAULT_EYE_DISTANCE_RATIO, DEFAULT_NOSE_RATIO};
use crate::embedder::{EmbedError, EmbeddingModel};
use crate::flight::{FlightPermit, SingleFlight};
use crate::frame::{self, Frame, FrameError};
use crate::liveness::LivenessModel;
use crate::similarity::{Matcher, NearestMatcher, SimilarityError, DEFAULT_SIMILARITY_THRESHOLD};
use crate::store::{BlobStore, GalleryStore, StoreError};
use crate::types::{Embedding, FaceDetection, Gallery, GalleryEntry, Identity, MatchResult};
use image::RgbImage;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Tunables for alignment and the acceptance gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognitionConfig {
    /// Minimum cosine similarity for a match to be accepted.
    pub threshold: f32,
    pub nose_ratio: f32,
    pub eye_distance_ratio: f32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            nose_ratio: DEFAULT_NOSE_RATIO,
            eye_distance_ratio: DEFAULT_EYE_DISTANCE_RATIO,
        }
    }
}

/// Stages of one recognition attempt, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Detecting,
    Aligning,
    Embedding,
    Comparing,
    Decided,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Detecting => "detecting",
            Stage::Aligning => "aligning",
            Stage::Embedding => "embedding",
            Stage::Comparing => "comparing",
            Stage::Decided => "decided",
        };
        f.write_str(name)
    }
}

/// A pipeline failure tagged with the stage that produced it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{stage} failed: {reason}")]
pub struct StageError {
    pub stage: Stage,
    pub reason: String,
}

impl StageError {
    fn new(stage: Stage, reason: impl fmt::Display) -> Self {
        Self {
            stage,
            reason: reason.to_string(),
        }
    }
}

/// Reasons an enrollment is refused. The messages are shown to the user.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollRejection {
    #[error("Face is empty")]
    FaceEmpty,
    #[error("Name Already Exist")]
    NameAlreadyExists,
    #[error("Face Already Exist")]
    FaceAlreadyExists,
}

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error(transparent)]
    Rejected(#[from] EnrollRejection),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("image: {0}")]
    Frame(#[from] FrameError),
    #[error("embedding: {0}")]
    Embed(#[from] EmbedError),
    #[error("similarity: {0}")]
    Similarity(#[from] SimilarityError),
}

impl CoordinatorError {
    pub fn rejection(&self) -> Option<EnrollRejection> {
        match self {
            CoordinatorError::Rejected(r) => Some(*r),
            _ => None,
        }
    }
}

/// Outcome of a recognition decision for one frame.
#[derive(Clone)]
pub struct Decision {
    /// Nearest enrolled identity, if the gallery was non-empty.
    pub identity: Option<Identity>,
    pub distance: Option<f32>,
    pub similarity: Option<f32>,
    pub matches_criteria: bool,
    /// Auxiliary liveness score; `None` when unavailable.
    pub liveness: Option<f32>,
    /// Aligned face crop that produced the probe embedding.
    pub face: RgbImage,
    pub annotated_frame: RgbImage,
}

impl fmt::Debug for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decision")
            .field("identity", &self.identity)
            .field("distance", &self.distance)
            .field("similarity", &self.similarity)
            .field("matches_criteria", &self.matches_criteria)
            .field("liveness", &self.liveness)
            .finish_non_exhaustive()
    }
}

/// Result of submitting one frame.
#[derive(Debug, Clone)]
pub enum Recognition {
    /// Another attempt held the single-flight gate; the frame was dropped.
    Busy,
    /// The attempt stopped early; the next frame starts over.
    NoDecision { stage: Stage, reason: String },
    Decided(Decision),
}

impl Recognition {
    /// The decision, when it accepted a match.
    pub fn accepted(&self) -> Option<&Decision> {
        match self {
            Recognition::Decided(d) if d.matches_criteria => Some(d),
            _ => None,
        }
    }
}

/// A candidate identity to enroll.
#[derive(Clone)]
pub struct EnrollRequest {
    pub name: String,
    pub frame: Frame,
    pub detections: Vec<FaceDetection>,
}

/// Pick the detection with the largest bounding-box area. Ties keep the first.
pub fn select_primary_face(faces: &[FaceDetection]) -> Option<&FaceDetection> {
    faces.iter().fold(None, |best: Option<&FaceDetection>, face| match best {
        Some(b) if face.bbox.area() <= b.bbox.area() => Some(b),
        _ => Some(face),
    })
}

struct PreparedFace {
    face: RgbImage,
    upright: RgbImage,
    annotated: RgbImage,
}

/// Owns the model handles and the persistence seams.
pub struct Coordinator {
    embedder: Box<dyn EmbeddingModel>,
    liveness: Option<Box<dyn LivenessModel>>,
    matcher: Box<dyn Matcher + Send>,
    gallery_store: Arc<dyn GalleryStore>,
    blobs: Arc<dyn BlobStore>,
    flight: SingleFlight,
    config: RecognitionConfig,
}

impl Coordinator {
    pub fn new(
        embedder: Box<dyn EmbeddingModel>,
        gallery_store: Arc<dyn GalleryStore>,
        blobs: Arc<dyn BlobStore>,
        config: RecognitionConfig,
    ) -> Self {
        Self {
            embedder,
            liveness: None,
            matcher: Box::new(NearestMatcher),
            gallery_store,
            blobs,
            flight: SingleFlight::new(),
            config,
        }
    }

    pub fn with_liveness(mut self, model: Box<dyn LivenessModel>) -> Self {
        self.liveness = Some(model);
        self
    }

    pub fn with_matcher(mut self, matcher: Box<dyn Matcher + Send>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Gate that must be held to run [`recognize`](Self::recognize).
    pub fn flight(&self) -> SingleFlight {
        self.flight.clone()
    }

    pub fn config(&self) -> &RecognitionConfig {
        &self.config
    }

    pub fn has_liveness(&self) -> bool {
        self.liveness.is_some()
    }

    /// Run one recognition attempt against `gallery`.
    ///
    /// Never fails: any stage failure is logged and reported as
    /// [`Recognition::NoDecision`]. The permit is released when the attempt ends.
    pub fn recognize(
        &mut self,
        permit: FlightPermit,
        gallery: &Gallery,
        frame: &Frame,
        detections: &[FaceDetection],
    ) -> Recognition {
        let outcome = self.attempt(gallery, frame, detections);
        drop(permit);

        match outcome {
            Ok(Some(decision)) => {
                tracing::debug!(
                    stage = %Stage::Decided,
                    identity = decision.identity.as_ref().map(|i| i.name.as_str()),
                    similarity = decision.similarity,
                    matched = decision.matches_criteria,
                    "recognition decided"
                );
                Recognition::Decided(decision)
            }
            Ok(None) => {
                tracing::trace!("no face in frame");
                Recognition::NoDecision {
                    stage: Stage::Detecting,
                    reason: "no face detected".into(),
                }
            }
            Err(StageError { stage, reason }) => {
                tracing::warn!(%stage, %reason, "recognition attempt failed");
                Recognition::NoDecision { stage, reason }
            }
        }
    }

    fn attempt(
        &mut self,
        gallery: &Gallery,
        frame: &Frame,
        detections: &[FaceDetection],
    ) -> Result<Option<Decision>, StageError> {
        let Some(prepared) = self.prepare(frame, detections)? else {
            return Ok(None);
        };

        tracing::trace!(stage = %Stage::Embedding);
        let probe = self
            .embedder
            .embed(&prepared.face)
            .map_err(|e| StageError::new(Stage::Embedding, e))?;

        tracing::trace!(stage = %Stage::Comparing, gallery = gallery.len());
        let best = self
            .matcher
            .rank(&probe, gallery.entries(), self.config.threshold)
            .map_err(|e| StageError::new(Stage::Comparing, e))?;

        let liveness = self.score_liveness(&prepared.face);

        Ok(Some(decision(best, liveness, prepared)))
    }

    /// Orient the frame, pick the primary face and produce its aligned crop.
    fn prepare(
        &self,
        frame: &Frame,
        detections: &[FaceDetection],
    ) -> Result<Option<PreparedFace>, StageError> {
        tracing::trace!(stage = %Stage::Detecting, faces = detections.len());
        let (upright, oriented) = frame
            .oriented(detections)
            .map_err(|e| StageError::new(Stage::Detecting, e))?;
        let Some(primary) = select_primary_face(&oriented) else {
            return Ok(None);
        };
        let annotated = frame::annotate(&upright, &oriented, primary);

        tracing::trace!(stage = %Stage::Aligning);
        let (crop, (ox, oy)) = frame::crop_face(&upright, &primary.bbox)
            .map_err(|e| StageError::new(Stage::Aligning, e))?;
        let landmarks = primary.landmarks_relative_to(ox as f32, oy as f32);
        let face = match alignment::align(
            &crop,
            &landmarks,
            self.config.nose_ratio,
            self.config.eye_distance_ratio,
        ) {
            Ok(aligned) => aligned,
            Err(e) => {
                tracing::warn!(error = %e, "alignment unavailable; using unaligned crop");
                crop
            }
        };

        Ok(Some(PreparedFace {
            face,
            upright,
            annotated,
        }))
    }

    fn score_liveness(&mut self, face: &RgbImage) -> Option<f32> {
        let model = self.liveness.as_mut()?;
        match model.score(face) {
            Ok(score) => Some(score),
            Err(e) => {
                tracing::warn!(error = %e, "liveness scoring failed");
                None
            }
        }
    }

    /// Build a gallery snapshot by re-embedding every stored face image.
    ///
    /// Identities whose face blob cannot be read or embedded are skipped.
    pub fn load_gallery(&mut self) -> Result<Gallery, StoreError> {
        let identities = self.gallery_store.list()?;
        let mut entries = Vec::with_capacity(identities.len());

        for identity in identities {
            match self.embed_stored_face(&identity) {
                Ok(embedding) => entries.push(GalleryEntry {
                    identity,
                    embedding,
                }),
                Err(e) => tracing::warn!(
                    id = %identity.id,
                    name = %identity.name,
                    error = %e,
                    "skipping gallery entry"
                ),
            }
        }

        tracing::info!(entries = entries.len(), "gallery loaded");
        Ok(Gallery::new(entries))
    }

    fn embed_stored_face(&mut self, identity: &Identity) -> Result<Embedding, CoordinatorError> {
        let bytes = self.blobs.read(&identity.face_file_name())?;
        let face = frame::decode_image(&bytes)?;
        Ok(self.embedder.embed(&face)?)
    }

    /// Enroll a new identity.
    ///
    /// Rejects a frame without a face, a name already in the gallery, and a
    /// face that already matches an enrolled identity. Image blobs are written
    /// first, then the record; a failure in either phase deletes the blobs.
    pub fn enroll(&mut self, request: EnrollRequest) -> Result<Identity, CoordinatorError> {
        let EnrollRequest {
            name,
            frame,
            detections,
        } = request;

        let prepared = self
            .prepare(&frame, &detections)?
            .ok_or(EnrollRejection::FaceEmpty)?;

        if self.gallery_store.list()?.iter().any(|i| i.name == name) {
            return Err(EnrollRejection::NameAlreadyExists.into());
        }

        let probe = self.embedder.embed(&prepared.face)?;
        let gallery = self.load_gallery()?;
        if let Some(best) = self
            .matcher
            .rank(&probe, gallery.entries(), self.config.threshold)?
        {
            if best.matches_criteria {
                tracing::info!(
                    candidate = %name,
                    existing = %best.identity.name,
                    similarity = best.similarity,
                    "enrollment rejected: face already enrolled"
                );
                return Err(EnrollRejection::FaceAlreadyExists.into());
            }
        }

        let identity = Identity::new(name);
        self.persist(&identity, &prepared)?;
        tracing::info!(id = %identity.id, name = %identity.name, "identity enrolled");
        Ok(identity)
    }

    fn persist(
        &self,
        identity: &Identity,
        prepared: &PreparedFace,
    ) -> Result<(), CoordinatorError> {
        let blobs = [
            (identity.face_file_name(), frame::encode_png(&prepared.face)?),
            (identity.frame_file_name(), frame::encode_png(&prepared.annotated)?),
            (identity.image_file_name(), frame::encode_png(&prepared.upright)?),
        ];

        let mut touched = Vec::with_capacity(blobs.len());
        for (name, bytes) in &blobs {
            touched.push(name.as_str());
            if let Err(e) = self.blobs.write(name, bytes) {
                tracing::error!(blob = %name, error = %e, "blob write failed; rolling back");
                self.delete_blobs(&touched);
                return Err(e.into());
            }
        }

        if let Err(e) = self.gallery_store.insert(identity) {
            tracing::error!(id = %identity.id, error = %e, "record insert failed; rolling back");
            self.delete_blobs(&touched);
            return Err(e.into());
        }

        Ok(())
    }

    fn delete_blobs<S: AsRef<str>>(&self, names: &[S]) {
        for name in names {
            let name = name.as_ref();
            if let Err(e) = self.blobs.delete(name) {
                tracing::warn!(blob = %name, error = %e, "failed to delete blob");
            }
        }
    }

    /// Delete an identity and its image blobs. Returns false for an unknown id.
    pub fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let Some(identity) = self.gallery_store.get(id)? else {
            return Ok(false);
        };
        let removed = self.gallery_store.delete(id)?;
        self.delete_blobs(&identity.file_names());
        tracing::info!(id, name = %identity.name, "identity removed");
        Ok(removed)
    }

    /// Delete every identity and its blobs, returning the number of records removed.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let identities = self.gallery_store.list()?;
        let removed = self.gallery_store.clear()?;
        for identity in &identities {
            self.delete_blobs(&identity.file_names());
        }
        tracing::info!(removed, "gallery cleared");
        Ok(removed)
    }

    pub fn list(&self) -> Result<Vec<Identity>, StoreError> {
        self.gallery_store.list()
    }
}

fn decision(best: Option<MatchResult>, liveness: Option<f32>, prepared: PreparedFace) -> Decision {
    let (identity, distance, similarity, matches_criteria) = match best {
        Some(m) => (Some(m.identity), Some(m.distance), Some(m.similarity), m.matches_criteria),
        None => (None, None, None, false),
    };
    Decision {
        identity,
        distance,
        similarity,
        matches_criteria,
        liveness,
        face: prepared.face,
        annotated_frame: prepared.annotated,
    }
}
