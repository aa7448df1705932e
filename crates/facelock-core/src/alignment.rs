//! Face alignment via an eye/nose-normalized similarity transform.
//!
//! Levels the eye line, scales the inter-eye distance to a fixed fraction of
//! the crop width and places the nose base at a fixed fraction of the crop
//! height. The output keeps the input dimensions.

use crate::types::{LandmarkKind, Landmarks, Point};
use image::{Rgb, RgbImage};
use thiserror::Error;

/// Default vertical position of the nose base, as a fraction of crop height.
pub const DEFAULT_NOSE_RATIO: f32 = 0.4;
/// Default inter-eye distance, as a fraction of crop width.
pub const DEFAULT_EYE_DISTANCE_RATIO: f32 = 0.3;

/// Minimum inter-eye distance (pixels) below which the transform is degenerate.
const MIN_EYE_DISTANCE: f32 = 1e-3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignError {
    #[error("crop has no pixels")]
    EmptyImage,
    #[error("eye landmarks too close to align ({0} px apart)")]
    DegenerateEyes(f32),
    #[error("non-finite alignment transform")]
    NonFinite,
}

/// 4-DOF similarity transform: `dst = scale * R(-angle) * (src - center) + translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignTransform {
    /// Eye-line angle in degrees, measured in the source image.
    pub angle_degrees: f32,
    pub scale: f32,
    center: Point,
    translation: Point,
    cos: f32,
    sin: f32,
}

impl AlignTransform {
    /// Build the transform for a crop of `width`×`height`.
    ///
    /// Returns `Ok(None)` when either eye or the nose base is missing.
    pub fn from_landmarks(
        landmarks: &Landmarks,
        width: u32,
        height: u32,
        nose_ratio: f32,
        eye_distance_ratio: f32,
    ) -> Result<Option<Self>, AlignError> {
        let (Some(left), Some(right), Some(nose)) = (
            landmarks.get(&LandmarkKind::LeftEye).copied(),
            landmarks.get(&LandmarkKind::RightEye).copied(),
            landmarks.get(&LandmarkKind::NoseBase).copied(),
        ) else {
            return Ok(None);
        };

        // Measure the eye line from the image-left eye so a level face has angle 0
        // regardless of subject/mirror handedness.
        let (first, second) = if left.x <= right.x { (left, right) } else { (right, left) };

        let dx = second.x - first.x;
        let dy = second.y - first.y;
        let eye_distance = dx.hypot(dy);
        if !eye_distance.is_finite() {
            return Err(AlignError::NonFinite);
        }
        if eye_distance < MIN_EYE_DISTANCE {
            return Err(AlignError::DegenerateEyes(eye_distance));
        }

        let angle = dy.atan2(dx);
        let (sin, cos) = angle.sin_cos();
        let scale = eye_distance_ratio * width as f32 / eye_distance;
        let center = Point::new((first.x + second.x) / 2.0, (first.y + second.y) / 2.0);

        let mut transform = Self {
            angle_degrees: angle.to_degrees(),
            scale,
            center,
            translation: Point::new(0.0, 0.0),
            cos,
            sin,
        };

        let nose_y = transform.apply(nose).y;
        transform.translation = Point::new(width as f32 / 2.0, nose_ratio * height as f32 - nose_y);

        if !(transform.scale.is_finite()
            && transform.translation.x.is_finite()
            && transform.translation.y.is_finite())
        {
            return Err(AlignError::NonFinite);
        }

        Ok(Some(transform))
    }

    /// Map a source point into the aligned crop.
    pub fn apply(&self, p: Point) -> Point {
        let vx = p.x - self.center.x;
        let vy = p.y - self.center.y;
        Point::new(
            self.scale * (vx * self.cos + vy * self.sin) + self.translation.x,
            self.scale * (-vx * self.sin + vy * self.cos) + self.translation.y,
        )
    }

    /// Map an aligned-crop point back into the source.
    pub fn invert(&self, p: Point) -> Point {
        let vx = (p.x - self.translation.x) / self.scale;
        let vy = (p.y - self.translation.y) / self.scale;
        Point::new(
            vx * self.cos - vy * self.sin + self.center.x,
            vx * self.sin + vy * self.cos + self.center.y,
        )
    }
}

/// Align a face crop by its landmarks.
///
/// Missing eye or nose landmarks pass the crop through unchanged.
pub fn align(
    crop: &RgbImage,
    landmarks: &Landmarks,
    nose_ratio: f32,
    eye_distance_ratio: f32,
) -> Result<RgbImage, AlignError> {
    let (width, height) = crop.dimensions();
    if width == 0 || height == 0 {
        return Err(AlignError::EmptyImage);
    }

    let transform =
        AlignTransform::from_landmarks(landmarks, width, height, nose_ratio, eye_distance_ratio)?;
    match transform {
        Some(transform) => {
            tracing::trace!(
                angle = transform.angle_degrees,
                scale = transform.scale,
                "aligning face crop"
            );
            Ok(warp(crop, &transform))
        }
        None => {
            tracing::debug!("eye/nose landmarks missing; using unaligned crop");
            Ok(crop.clone())
        }
    }
}

/// Inverse-map every output pixel through the transform.
///
/// Uses bilinear interpolation. Out-of-bounds pixels are filled with black.
fn warp(src: &RgbImage, transform: &AlignTransform) -> RgbImage {
    let (width, height) = src.dimensions();
    let (w, h) = (width as i64, height as i64);

    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && x < w && y >= 0 && y < h {
            src.get_pixel(x as u32, y as u32)[c] as f32
        } else {
            0.0
        }
    };

    RgbImage::from_fn(width, height, |ox, oy| {
        let s = transform.invert(Point::new(ox as f32, oy as f32));

        let x0 = s.x.floor() as i64;
        let y0 = s.y.floor() as i64;
        let fx = s.x - x0 as f32;
        let fy = s.y - y0 as f32;

        let mut px = [0u8; 3];
        for (c, out) in px.iter_mut().enumerate() {
            let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1, c) * fx * fy;
            *out = val.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(px)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landmarks(left: (f32, f32), right: (f32, f32), nose: (f32, f32)) -> Landmarks {
        Landmarks::from([
            (LandmarkKind::LeftEye, Point::new(left.0, left.1)),
            (LandmarkKind::RightEye, Point::new(right.0, right.1)),
            (LandmarkKind::NoseBase, Point::new(nose.0, nose.1)),
        ])
    }

    #[test]
    fn test_eyes_leveled_and_scaled() {
        let lm = landmarks((30.0, 50.0), (70.0, 62.0), (52.0, 80.0));
        let t = AlignTransform::from_landmarks(&lm, 100, 120, 0.4, 0.3)
            .unwrap()
            .unwrap();

        let l = t.apply(lm[&LandmarkKind::LeftEye]);
        let r = t.apply(lm[&LandmarkKind::RightEye]);
        let n = t.apply(lm[&LandmarkKind::NoseBase]);

        assert!((l.y - r.y).abs() < 1e-3, "eye y: {} vs {}", l.y, r.y);
        assert!((l.distance_to(&r) - 30.0).abs() < 1e-3, "eye distance {}", l.distance_to(&r));
        assert!((n.y - 48.0).abs() < 1e-3, "nose y {}", n.y);
        assert!(((l.x + r.x) / 2.0 - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_swapped_eye_order_still_levels() {
        let lm = landmarks((70.0, 62.0), (30.0, 50.0), (52.0, 80.0));
        let t = AlignTransform::from_landmarks(&lm, 100, 120, 0.4, 0.3)
            .unwrap()
            .unwrap();
        let l = t.apply(lm[&LandmarkKind::LeftEye]);
        let r = t.apply(lm[&LandmarkKind::RightEye]);
        assert!((l.y - r.y).abs() < 1e-3);
        // Nose stays below the eyes: no upside-down flip.
        assert!(t.apply(lm[&LandmarkKind::NoseBase]).y > l.y);
    }

    #[test]
    fn test_invert_roundtrip() {
        let lm = landmarks((20.0, 40.0), (60.0, 30.0), (45.0, 70.0));
        let t = AlignTransform::from_landmarks(&lm, 90, 110, 0.4, 0.3)
            .unwrap()
            .unwrap();
        let p = Point::new(13.0, 77.0);
        let back = t.invert(t.apply(p));
        assert!((back.x - p.x).abs() < 1e-3 && (back.y - p.y).abs() < 1e-3);
    }

    #[test]
    fn test_missing_landmark_passes_through() {
        let crop = RgbImage::from_fn(40, 30, |x, y| Rgb([x as u8, y as u8, 7]));
        let mut lm = landmarks((10.0, 10.0), (30.0, 10.0), (20.0, 20.0));
        lm.remove(&LandmarkKind::NoseBase);

        let out = align(&crop, &lm, DEFAULT_NOSE_RATIO, DEFAULT_EYE_DISTANCE_RATIO).unwrap();
        assert_eq!(out.dimensions(), crop.dimensions());
        assert_eq!(out, crop);
    }

    #[test]
    fn test_degenerate_eyes() {
        let lm = landmarks((10.0, 10.0), (10.0, 10.0), (10.0, 20.0));
        let crop = RgbImage::new(40, 40);
        assert!(matches!(
            align(&crop, &lm, 0.4, 0.3),
            Err(AlignError::DegenerateEyes(_))
        ));
    }

    #[test]
    fn test_empty_crop() {
        let lm = landmarks((10.0, 10.0), (30.0, 10.0), (20.0, 20.0));
        assert_eq!(align(&RgbImage::new(0, 5), &lm, 0.4, 0.3), Err(AlignError::EmptyImage));
    }

    #[test]
    fn test_align_keeps_dimensions() {
        let crop = RgbImage::from_pixel(64, 80, Rgb([200, 100, 50]));
        let lm = landmarks((20.0, 30.0), (44.0, 34.0), (32.0, 50.0));
        let out = align(&crop, &lm, 0.4, 0.3).unwrap();
        assert_eq!(out.dimensions(), (64, 80));
    }

    #[test]
    fn test_landmark_patch_lands_on_target() {
        // Paint a bright patch around the left eye and check it shows up where
        // the transform says it should.
        let mut crop = RgbImage::new(100, 100);
        let lm = landmarks((30.0, 40.0), (70.0, 48.0), (50.0, 70.0));
        for dy in 0..5 {
            for dx in 0..5 {
                crop.put_pixel(28 + dx, 38 + dy, Rgb([255, 255, 255]));
            }
        }

        let t = AlignTransform::from_landmarks(&lm, 100, 100, 0.4, 0.3)
            .unwrap()
            .unwrap();
        let target = t.apply(lm[&LandmarkKind::LeftEye]);
        let out = align(&crop, &lm, 0.4, 0.3).unwrap();

        let (tx, ty) = (target.x.round() as u32, target.y.round() as u32);
        let mut max_val = 0u8;
        for y in ty.saturating_sub(1)..=(ty + 1).min(99) {
            for x in tx.saturating_sub(1)..=(tx + 1).min(99) {
                max_val = max_val.max(out.get_pixel(x, y)[0]);
            }
        }
        assert!(max_val > 100, "expected bright patch near ({tx}, {ty}), max={max_val}");
    }
}
