//! facelock-core: face alignment, embedding and gallery matching.
//!
//! Aligns detected faces by their landmarks, embeds them with FaceNet via
//! ONNX Runtime and ranks them against an enrolled gallery. Face detection
//! itself is supplied by the caller.

pub mod access_log;
pub mod alignment;
pub mod coordinator;
pub mod embedder;
pub mod flight;
pub mod frame;
pub mod liveness;
pub mod memory;
pub mod similarity;
pub mod store;
pub mod types;

pub use coordinator::{
    select_primary_face, Coordinator, CoordinatorError, Decision, EnrollRejection, EnrollRequest,
    Recognition, RecognitionConfig, Stage,
};
pub use flight::{FlightPermit, SingleFlight};
pub use frame::{Frame, LensFacing};
pub use types::{BoundingBox, Embedding, FaceDetection, Gallery, Identity, LandmarkKind, Point};
