use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Similarity above which a new registration is rejected as an already-known face.
pub const DUPLICATE_THRESHOLD: f32 = 0.95;
/// Minimum similarity (exclusive) for a recognition match.
pub const RECOGNITION_THRESHOLD: f32 = 0.70;
/// Landmark-space distance that maps to similarity 0.
///
/// Mesh coordinates are normalized to the crop, so distances between faces
/// rarely exceed this across ~478×3 dimensions.
pub const SIMILARITY_SCALE: f32 = 10.0;

/// Integer pixel bounding box of a detected face, clamped to the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    /// Clamp a floating-point detector box to a `width`×`height` image.
    ///
    /// Coordinates are truncated toward zero. A box lying fully outside the
    /// image collapses to zero area.
    pub fn clamped(x: f32, y: f32, w: f32, h: f32, width: u32, height: u32) -> Self {
        let x0 = (x.max(0.0) as u32).min(width);
        let y0 = (y.max(0.0) as u32).min(height);
        let x1 = ((x + w).max(0.0) as u32).min(width);
        let y1 = ((y + h).max(0.0) as u32).min(height);
        Self {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0),
            height: y1.saturating_sub(y0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Flattened face-mesh landmarks: `[x0, y0, z0, x1, y1, z1, ...]` in landmark order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    pub values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Similarity in [0, 1] derived from Euclidean distance: `max(0, 1 - d / 10)`.
    ///
    /// Returns 0.0 when either vector is empty or the lengths differ.
    pub fn similarity(&self, other: &FeatureVector) -> f32 {
        if self.is_empty() || other.is_empty() || self.len() != other.len() {
            return 0.0;
        }
        (1.0 - self.euclidean_distance(other) / SIMILARITY_SCALE).max(0.0)
    }

    /// Euclidean distance over the common prefix of both vectors.
    ///
    /// Squares are summed in `f64`; a full mesh has over a thousand terms.
    pub fn euclidean_distance(&self, other: &FeatureVector) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(&a, &b)| (f64::from(a) - f64::from(b)).powi(2))
            .sum::<f64>()
            .sqrt() as f32
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// One face found by a [`FeatureExtractor`](crate::FeatureExtractor).
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: FaceBox,
    /// Empty if the mesh model found no landmarks inside the crop.
    pub features: FeatureVector,
}

/// Recognition outcome for one detected face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub bbox: FaceBox,
    /// `None` when no registered face cleared the recognition threshold.
    pub name: Option<String>,
    pub confidence: f32,
}

/// Registered identities keyed by name. Iteration is lexicographic.
pub type Gallery = BTreeMap<String, FeatureVector>;

/// Result of matching a probe vector against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Similarity of the accepted match, 0.0 when nothing matched.
    pub similarity: f32,
    pub name: Option<String>,
}

impl MatchResult {
    pub fn unknown() -> Self {
        Self {
            similarity: 0.0,
            name: None,
        }
    }
}

/// A gallery entry that is too close to a probe to register it again.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateHit {
    pub name: String,
    pub similarity: f32,
}

/// Strategy for comparing probe vectors against a gallery of registered faces.
pub trait Matcher {
    /// Best gallery entry strictly above `threshold`.
    fn compare(&self, probe: &FeatureVector, gallery: &Gallery, threshold: f32) -> MatchResult;

    /// First (gallery entry, probe) pair whose similarity is strictly above `threshold`.
    fn find_duplicate(
        &self,
        probes: &[FeatureVector],
        gallery: &Gallery,
        threshold: f32,
    ) -> Option<DuplicateHit>;
}

/// Linear-scan matcher over [`FeatureVector::similarity`].
///
/// Ties keep the first name in gallery order, which is lexicographic.
pub struct LandmarkMatcher;

impl Matcher for LandmarkMatcher {
    fn compare(&self, probe: &FeatureVector, gallery: &Gallery, threshold: f32) -> MatchResult {
        let mut best = MatchResult::unknown();

        for (name, stored) in gallery {
            let sim = probe.similarity(stored);
            if sim > best.similarity && sim > threshold {
                best = MatchResult {
                    similarity: sim,
                    name: Some(name.clone()),
                };
            }
        }

        best
    }

    fn find_duplicate(
        &self,
        probes: &[FeatureVector],
        gallery: &Gallery,
        threshold: f32,
    ) -> Option<DuplicateHit> {
        for (name, stored) in gallery {
            for probe in probes {
                let sim = probe.similarity(stored);
                if sim > threshold {
                    return Some(DuplicateHit {
                        name: name.clone(),
                        similarity: sim,
                    });
                }
            }
        }
        None
    }
}
