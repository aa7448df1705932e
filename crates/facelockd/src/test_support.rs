//! Fakes shared by the daemon's unit tests.

use crate::engine::{spawn_engine, EngineHandle};
use facelock_core::embedder::{EmbedError, EmbeddingModel};
use facelock_core::memory::{MemoryBlobs, MemoryGallery};
use facelock_core::{
    BoundingBox, Coordinator, Embedding, FaceDetection, Frame, LensFacing, RecognitionConfig,
};
use image::{Rgb, RgbImage};
use std::sync::Arc;

pub const RED: [u8; 3] = [220, 30, 30];
pub const BLUE: [u8; 3] = [30, 30, 220];

/// Embeds a crop as its mean colour plus a constant bias term.
pub struct MeanColor;

impl EmbeddingModel for MeanColor {
    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, EmbedError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(EmbedError::EmptyImage);
        }
        let n = (face.width() * face.height()) as f32;
        let mut sums = [0.0f32; 3];
        for p in face.pixels() {
            for (sum, c) in sums.iter_mut().zip(p.0) {
                *sum += c as f32 / 255.0;
            }
        }
        Ok(Embedding::new(vec![sums[0] / n, sums[1] / n, sums[2] / n, 0.1]))
    }
}

pub fn face_box() -> FaceDetection {
    FaceDetection::new(BoundingBox::new(20.0, 20.0, 40.0, 40.0))
}

/// Grey 100x100 frame with a solid coloured square under [`face_box`].
pub fn frame_with(color: [u8; 3]) -> Frame {
    let img = RgbImage::from_fn(100, 100, |x, y| {
        if (20..60).contains(&x) && (20..60).contains(&y) {
            Rgb(color)
        } else {
            Rgb([90, 90, 90])
        }
    });
    Frame::new(img, 0, LensFacing::Back)
}

pub fn coordinator() -> Coordinator {
    Coordinator::new(
        Box::new(MeanColor),
        Arc::new(MemoryGallery::new()),
        Arc::new(MemoryBlobs::new()),
        RecognitionConfig::default(),
    )
}

pub fn engine() -> EngineHandle {
    spawn_engine(coordinator()).unwrap()
}
