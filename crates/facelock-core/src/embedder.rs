//! FaceNet embedding extractor via ONNX Runtime.
//!
//! Maps a face crop to a 512-dimensional embedding. The crop is resized to
//! 160×160 and normalized per RGB channel to roughly [-1, 1].

use crate::types::Embedding;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

pub const FACENET_INPUT_SIZE: u32 = 160;
pub const FACENET_EMBEDDING_DIM: usize = 512;
const FACENET_MODEL_VERSION: &str = "facenet_512";

const IMAGE_MEAN: f32 = 128.0;
const IMAGE_STD: f32 = 128.0;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("face image has no pixels")]
    EmptyImage,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A numeric model mapping a face crop to an embedding.
///
/// Implementations own their model handle and are invoked from one thread at a time.
pub trait EmbeddingModel: Send {
    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, EmbedError>;
}

/// Load an ONNX session, failing early with a readable error when the file is absent.
pub(crate) fn load_session(model_path: &str) -> Result<Session, EmbedError> {
    if !Path::new(model_path).exists() {
        return Err(EmbedError::ModelNotFound(model_path.to_string()));
    }

    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(model_path)?;

    tracing::info!(
        path = model_path,
        inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded ONNX model"
    );

    Ok(session)
}

/// Run a session on one preprocessed image and return the flattened first output.
pub(crate) fn run_single(
    session: &mut Session,
    input: &Array4<f32>,
) -> Result<Vec<f32>, EmbedError> {
    let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

    let (_, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| EmbedError::InferenceFailed(format!("output extraction: {e}")))?;

    Ok(data.to_vec())
}

/// FaceNet-based embedding extractor.
pub struct FaceNetEmbedder {
    session: Session,
}

impl FaceNetEmbedder {
    /// Load the FaceNet ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedError> {
        Ok(Self {
            session: load_session(model_path)?,
        })
    }
}

impl EmbeddingModel for FaceNetEmbedder {
    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, EmbedError> {
        let input = preprocess(face, FACENET_INPUT_SIZE)?;
        let values = run_single(&mut self.session, &input)?;

        if values.len() != FACENET_EMBEDDING_DIM {
            return Err(EmbedError::InferenceFailed(format!(
                "expected {FACENET_EMBEDDING_DIM}-dim embedding, got {}",
                values.len()
            )));
        }

        Ok(Embedding {
            values,
            model_version: Some(FACENET_MODEL_VERSION.to_string()),
        })
    }
}

/// Resize a face crop to `size`×`size` and pack it into an NHWC float tensor.
///
/// Channels are laid out R, G, B; each value is `(c - 128) / 128`.
pub fn preprocess(face: &RgbImage, size: u32) -> Result<Array4<f32>, EmbedError> {
    if face.width() == 0 || face.height() == 0 {
        return Err(EmbedError::EmptyImage);
    }

    let resized = image::imageops::resize(face, size, size, FilterType::Triangle);
    let side = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, side, side, 3));

    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, y as usize, x as usize, c]] = (pixel[c] as f32 - IMAGE_MEAN) / IMAGE_STD;
        }
    }

    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_output_shape() {
        let face = RgbImage::from_pixel(37, 52, Rgb([128, 128, 128]));
        let tensor = preprocess(&face, FACENET_INPUT_SIZE).unwrap();
        assert_eq!(tensor.shape(), &[1, 160, 160, 3]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let face = RgbImage::from_pixel(8, 8, Rgb([128, 0, 255]));
        let tensor = preprocess(&face, 4).unwrap();
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 0, 0, 1]], -1.0);
        assert!((tensor[[0, 3, 3, 2]] - 127.0 / 128.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_channel_order() {
        let face = RgbImage::from_pixel(4, 4, Rgb([255, 128, 0]));
        let tensor = preprocess(&face, 4).unwrap();
        assert!(tensor[[0, 1, 1, 0]] > 0.9);
        assert_eq!(tensor[[0, 1, 1, 1]], 0.0);
        assert_eq!(tensor[[0, 1, 1, 2]], -1.0);
    }

    #[test]
    fn test_preprocess_empty_image() {
        let err = preprocess(&RgbImage::new(0, 10), FACENET_INPUT_SIZE).unwrap_err();
        assert!(matches!(err, EmbedError::EmptyImage));
    }

    #[test]
    fn test_load_missing_model() {
        let err = FaceNetEmbedder::load("/nonexistent/facenet.onnx").err().unwrap();
        assert!(matches!(err, EmbedError::ModelNotFound(_)));
    }
}
