use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Timestamp format used for enrollment records and access-log entries.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time rendered with [`TIMESTAMP_FORMAT`].
pub fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// A 2D point in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f32 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

/// Axis-aligned face bounding box in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Named facial landmarks reported by the external detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkKind {
    LeftEye,
    RightEye,
    NoseBase,
    LeftEar,
    RightEar,
    LeftCheek,
    RightCheek,
    MouthLeft,
    MouthRight,
    MouthBottom,
}

/// Landmark positions keyed by kind. A missing kind is simply absent.
pub type Landmarks = BTreeMap<LandmarkKind, Point>;

/// One face reported by the external detector for a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    #[serde(default)]
    pub landmarks: Landmarks,
    #[serde(default)]
    pub left_eye_open: Option<f32>,
    #[serde(default)]
    pub right_eye_open: Option<f32>,
    /// Head rotation in degrees around the X (pitch), Y (yaw) and Z (roll) axes.
    #[serde(default)]
    pub head_euler: Option<[f32; 3]>,
    #[serde(default)]
    pub tracking_id: Option<i64>,
}

impl FaceDetection {
    pub fn new(bbox: BoundingBox) -> Self {
        Self {
            bbox,
            landmarks: Landmarks::new(),
            left_eye_open: None,
            right_eye_open: None,
            head_euler: None,
            tracking_id: None,
        }
    }

    pub fn with_landmark(mut self, kind: LandmarkKind, point: Point) -> Self {
        self.landmarks.insert(kind, point);
        self
    }

    pub fn landmark(&self, kind: LandmarkKind) -> Option<Point> {
        self.landmarks.get(&kind).copied()
    }

    /// Mirror this detection horizontally inside an image of the given width.
    ///
    /// Landmark kinds are kept as-is: mirroring the picture does not change
    /// which eye belongs to the subject.
    pub fn mirrored(&self, image_width: f32) -> Self {
        let mut out = self.clone();
        out.bbox.x = image_width - self.bbox.x - self.bbox.width;
        for point in out.landmarks.values_mut() {
            point.x = image_width - point.x;
        }
        out
    }

    /// Shift every landmark by `(-dx, -dy)`, mapping frame coordinates into a crop.
    pub fn landmarks_relative_to(&self, dx: f32, dy: f32) -> Landmarks {
        self.landmarks
            .iter()
            .map(|(kind, p)| (*kind, Point::new(p.x - dx, p.y - dy)))
            .collect()
    }
}

/// Face embedding vector (512-dimensional for the FaceNet recognizer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model configuration that produced this embedding (e.g., "facenet_512").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An enrolled identity. Records are created once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

impl Identity {
    /// New identity with a fresh v4 id, stamped with the current local time.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: now_timestamp(),
        }
    }

    /// Blob name of the aligned face crop; embeddings are recomputed from it.
    pub fn face_file_name(&self) -> String {
        format!("{}_face.png", self.id)
    }

    /// Blob name of the annotated frame captured at enrollment.
    pub fn frame_file_name(&self) -> String {
        format!("{}_frame.png", self.id)
    }

    /// Blob name of the full upright image captured at enrollment.
    pub fn image_file_name(&self) -> String {
        format!("{}_image.png", self.id)
    }

    pub fn file_names(&self) -> [String; 3] {
        [
            self.face_file_name(),
            self.frame_file_name(),
            self.image_file_name(),
        ]
    }
}

/// An enrolled identity paired with the embedding computed from its stored face.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub identity: Identity,
    pub embedding: Embedding,
}

/// Read-only snapshot of the gallery, in store listing order.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
    loaded_at: Option<String>,
}

impl Gallery {
    pub fn new(entries: Vec<GalleryEntry>) -> Self {
        Self {
            entries,
            loaded_at: Some(now_timestamp()),
        }
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn loaded_at(&self) -> Option<&str> {
        self.loaded_at.as_deref()
    }
}

/// Best match of a probe embedding against a gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub identity: Identity,
    /// Euclidean distance to the probe; lower is closer.
    pub distance: f32,
    /// Cosine similarity to the probe in [-1, 1]; higher is closer.
    pub similarity: f32,
    /// `similarity >= threshold`.
    pub matches_criteria: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_area() {
        assert_eq!(BoundingBox::new(3.0, 4.0, 10.0, 20.0).area(), 200.0);
    }

    #[test]
    fn test_mirrored_detection() {
        let det = FaceDetection::new(BoundingBox::new(10.0, 5.0, 30.0, 40.0))
            .with_landmark(LandmarkKind::LeftEye, Point::new(20.0, 15.0));
        let m = det.mirrored(100.0);
        assert_eq!(m.bbox.x, 60.0);
        assert_eq!(m.bbox.y, 5.0);
        assert_eq!(m.landmark(LandmarkKind::LeftEye), Some(Point::new(80.0, 15.0)));
    }

    #[test]
    fn test_mirrored_twice_is_identity() {
        let det = FaceDetection::new(BoundingBox::new(12.5, 5.0, 30.0, 40.0))
            .with_landmark(LandmarkKind::NoseBase, Point::new(27.0, 30.0));
        assert_eq!(det.mirrored(64.0).mirrored(64.0), det);
    }

    #[test]
    fn test_identity_file_names() {
        let identity = Identity {
            id: "abc".into(),
            name: "Ana".into(),
            created_at: "2024-01-01 00:00:00".into(),
        };
        assert_eq!(
            identity.file_names(),
            ["abc_face.png".to_string(), "abc_frame.png".into(), "abc_image.png".into()]
        );
    }

    #[test]
    fn test_identity_new_unique_ids() {
        let a = Identity::new("a");
        let b = Identity::new("a");
        assert_ne!(a.id, b.id);
        assert_eq!(a.created_at.len(), "2024-01-01 00:00:00".len());
    }

    #[test]
    fn test_detection_json_landmark_keys() {
        let det = FaceDetection::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0))
            .with_landmark(LandmarkKind::NoseBase, Point::new(0.5, 0.5));
        let json = serde_json::to_string(&det).unwrap();
        assert!(json.contains("\"nose_base\""), "{json}");

        let parsed: FaceDetection =
            serde_json::from_str(r#"{"bbox":{"x":1,"y":2,"width":3,"height":4}}"#).unwrap();
        assert!(parsed.landmarks.is_empty());
        assert_eq!(parsed.tracking_id, None);
    }
}
