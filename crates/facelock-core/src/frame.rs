//! Frame orientation, face cropping, annotation and the PNG codec.

use crate::types::{BoundingBox, FaceDetection, Point};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

const ANNOTATION_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const LANDMARK_RADIUS: i32 = 2;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unsupported rotation: {0} degrees (expected 0, 90, 180 or 270)")]
    UnsupportedRotation(u32),
    #[error("frame has no pixels")]
    EmptyImage,
    #[error("face crop is empty: {width}x{height} at ({x}, {y})")]
    EmptyCrop { x: u32, y: u32, width: u32, height: u32 },
    #[error("image codec: {0}")]
    Codec(#[from] image::ImageError),
}

/// Which way the capturing sensor faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LensFacing {
    Front,
    Back,
}

/// A raw camera frame as delivered by the capture source.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Clockwise rotation needed to bring the image upright.
    pub rotation_degrees: u32,
    pub lens_facing: LensFacing,
}

impl Frame {
    pub fn new(image: RgbImage, rotation_degrees: u32, lens_facing: LensFacing) -> Self {
        Self {
            image,
            rotation_degrees,
            lens_facing,
        }
    }

    /// Rotate the frame upright and, for a front-facing sensor, mirror it
    /// together with its detections.
    ///
    /// Detections are expected in upright coordinates, as the detector reports them.
    pub fn oriented(
        &self,
        detections: &[FaceDetection],
    ) -> Result<(RgbImage, Vec<FaceDetection>), FrameError> {
        if self.image.width() == 0 || self.image.height() == 0 {
            return Err(FrameError::EmptyImage);
        }

        let upright = rotate_upright(&self.image, self.rotation_degrees)?;
        match self.lens_facing {
            LensFacing::Back => Ok((upright, detections.to_vec())),
            LensFacing::Front => {
                let width = upright.width() as f32;
                let mirrored = image::imageops::flip_horizontal(&upright);
                let detections = detections.iter().map(|d| d.mirrored(width)).collect();
                Ok((mirrored, detections))
            }
        }
    }
}

/// Rotate an image clockwise by a multiple of 90 degrees.
pub fn rotate_upright(image: &RgbImage, degrees: u32) -> Result<RgbImage, FrameError> {
    match degrees % 360 {
        0 => Ok(image.clone()),
        90 => Ok(image::imageops::rotate90(image)),
        180 => Ok(image::imageops::rotate180(image)),
        270 => Ok(image::imageops::rotate270(image)),
        _ => Err(FrameError::UnsupportedRotation(degrees)),
    }
}

/// Crop the face box out of a frame, clamped to the frame bounds.
///
/// Returns the crop and the integer offset of its top-left corner.
pub fn crop_face(
    image: &RgbImage,
    bbox: &BoundingBox,
) -> Result<(RgbImage, (u32, u32)), FrameError> {
    let (w, h) = image.dimensions();
    let x0 = bbox.x.max(0.0).floor().min(w as f32) as u32;
    let y0 = bbox.y.max(0.0).floor().min(h as f32) as u32;
    let x1 = (bbox.x + bbox.width).ceil().clamp(0.0, w as f32) as u32;
    let y1 = (bbox.y + bbox.height).ceil().clamp(0.0, h as f32) as u32;

    if x1 <= x0 || y1 <= y0 {
        return Err(FrameError::EmptyCrop {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0),
            height: y1.saturating_sub(y0),
        });
    }

    let crop = image::imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    Ok((crop, (x0, y0)))
}

/// Copy of the frame with every detection box outlined and the primary
/// face's landmarks marked.
///
/// Boxes are clamped to the canvas and landmarks outside it are skipped.
pub fn annotate(
    image: &RgbImage,
    detections: &[FaceDetection],
    primary: &FaceDetection,
) -> RgbImage {
    let mut canvas = image.clone();
    let (w, h) = canvas.dimensions();

    for det in detections {
        let x0 = canvas_coord(det.bbox.x, w);
        let y0 = canvas_coord(det.bbox.y, h);
        let x1 = canvas_coord(det.bbox.x + det.bbox.width, w);
        let y1 = canvas_coord(det.bbox.y + det.bbox.height, h);
        let rect = Rect::at(x0, y0).of_size((x1 - x0).max(1) as u32, (y1 - y0).max(1) as u32);
        draw_hollow_rect_mut(&mut canvas, rect, ANNOTATION_COLOR);
    }

    for Point { x, y } in primary.landmarks.values() {
        let (x, y) = (x.round(), y.round());
        if !(x >= 0.0 && y >= 0.0 && x < w as f32 && y < h as f32) {
            tracing::debug!(x, y, "landmark outside frame; not drawn");
            continue;
        }
        draw_filled_circle_mut(
            &mut canvas,
            (x as i32, y as i32),
            LANDMARK_RADIUS,
            ANNOTATION_COLOR,
        );
    }

    canvas
}

/// Round a coordinate and clamp it to one pixel past either canvas edge,
/// so off-canvas outline edges stay off-canvas.
fn canvas_coord(v: f32, limit: u32) -> i32 {
    if v.is_nan() {
        return -1;
    }
    v.round().clamp(-1.0, limit as f32) as i32
}

/// Encode an image as PNG bytes.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, FrameError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Decode PNG (or any format `image` recognizes) into RGB, dropping alpha.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, FrameError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}
