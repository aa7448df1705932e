//! Auxiliary MobileNet liveness scorer.
//!
//! The score is reported alongside a decision and never gates it.

use crate::embedder::{self, EmbedError};
use image::RgbImage;
use ort::session::Session;

pub const MOBILENET_INPUT_SIZE: u32 = 224;

/// A model producing one scalar for a face crop.
pub trait LivenessModel: Send {
    fn score(&mut self, face: &RgbImage) -> Result<f32, EmbedError>;
}

/// MobileNet anti-spoof classifier.
pub struct MobileNetScorer {
    session: Session,
}

impl MobileNetScorer {
    pub fn load(model_path: &str) -> Result<Self, EmbedError> {
        Ok(Self {
            session: embedder::load_session(model_path)?,
        })
    }
}

impl LivenessModel for MobileNetScorer {
    fn score(&mut self, face: &RgbImage) -> Result<f32, EmbedError> {
        let input = embedder::preprocess(face, MOBILENET_INPUT_SIZE)?;
        let output = embedder::run_single(&mut self.session, &input)?;
        output
            .first()
            .copied()
            .ok_or_else(|| EmbedError::InferenceFailed("liveness model produced no output".into()))
    }
}
