//! Embedding distance metrics and nearest-neighbor ranking.

use crate::types::{Embedding, GalleryEntry, MatchResult};
use thiserror::Error;

/// Default cosine similarity an accepted match must reach.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.8;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("embeddings are not comparable: {left} vs {right} dimensions")]
    DimensionMismatch { left: usize, right: usize },
    #[error("cosine similarity undefined for a zero-norm embedding")]
    ZeroNorm,
}

impl Embedding {
    fn check_comparable(&self, other: &Embedding) -> Result<(), SimilarityError> {
        if self.values.len() != other.values.len() {
            return Err(SimilarityError::DimensionMismatch {
                left: self.values.len(),
                right: other.values.len(),
            });
        }
        Ok(())
    }

    /// Euclidean distance between two embeddings. Lower = closer.
    pub fn distance(&self, other: &Embedding) -> Result<f32, SimilarityError> {
        self.check_comparable(other)?;
        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn cosine_similarity(&self, other: &Embedding) -> Result<f32, SimilarityError> {
        self.check_comparable(other)?;

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;
        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom == 0.0 {
            return Err(SimilarityError::ZeroNorm);
        }
        // Rounding can push |dot / denom| a hair past 1.
        Ok((dot / denom).clamp(-1.0, 1.0))
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    /// Best entry for `probe`, or `None` when the gallery is empty.
    fn rank(
        &self,
        probe: &Embedding,
        gallery: &[GalleryEntry],
        threshold: f32,
    ) -> Result<Option<MatchResult>, SimilarityError>;
}

/// Minimum-distance matcher.
///
/// Ranks by Euclidean distance; the first entry reaching the global minimum
/// wins. Cosine similarity of the winner is reported and is the only
/// acceptance gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestMatcher;

impl Matcher for NearestMatcher {
    fn rank(
        &self,
        probe: &Embedding,
        gallery: &[GalleryEntry],
        threshold: f32,
    ) -> Result<Option<MatchResult>, SimilarityError> {
        let mut best: Option<(usize, f32)> = None;

        for (i, entry) in gallery.iter().enumerate() {
            let distance = probe.distance(&entry.embedding)?;
            match best {
                Some((_, min)) if distance >= min => {}
                _ => best = Some((i, distance)),
            }
        }

        let Some((idx, distance)) = best else {
            return Ok(None);
        };

        let entry = &gallery[idx];
        let similarity = probe.cosine_similarity(&entry.embedding)?;
        tracing::debug!(
            name = %entry.identity.name,
            distance,
            similarity,
            threshold,
            "nearest gallery entry"
        );

        Ok(Some(MatchResult {
            identity: entry.identity.clone(),
            distance,
            similarity,
            matches_criteria: similarity >= threshold,
        }))
    }
}
