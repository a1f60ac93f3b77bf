//! Registration and recognition over a shared [`FaceStore`].

use crate::extractor::{ExtractorError, FeatureExtractor};
use crate::imaging::{self, ImageInputError};
use crate::store::{validate_identity, FaceStore, StoreError};
use crate::types::{
    DetectedFace, FaceMatch, FeatureVector, LandmarkMatcher, Matcher, DUPLICATE_THRESHOLD,
    RECOGNITION_THRESHOLD,
};
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no face found in the image")]
    NoFaceDetected,
    #[error("this face is already registered as {name:?} (similarity: {:.1}%)", .similarity * 100.0)]
    DuplicateFace { name: String, similarity: f32 },
    #[error("storage failure: {0}")]
    Storage(#[source] StoreError),
    #[error("feature extraction failed: {0}")]
    Extraction(#[from] ExtractorError),
}

impl From<ImageInputError> for ServiceError {
    fn from(err: ImageInputError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            err @ StoreError::InvalidName { .. } => Self::InvalidInput(err.to_string()),
            other => Self::Storage(other),
        }
    }
}

/// Similarity cut-offs used by the services.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Registration is refused above this similarity to any stored face.
    pub duplicate: f32,
    /// Recognition reports a name only above this similarity.
    pub recognition: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            duplicate: DUPLICATE_THRESHOLD,
            recognition: RECOGNITION_THRESHOLD,
        }
    }
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub name: String,
    /// Faces found in the image; only the first was stored.
    pub faces_detected: usize,
}

impl Registration {
    pub fn message(&self) -> String {
        format!("\"{}\" registration complete.", self.name)
    }
}

/// Face registration and recognition over one store.
pub struct FaceService {
    store: Arc<FaceStore>,
    thresholds: Thresholds,
    matcher: LandmarkMatcher,
}

impl FaceService {
    pub fn new(store: Arc<FaceStore>, thresholds: Thresholds) -> Self {
        Self {
            store,
            thresholds,
            matcher: LandmarkMatcher,
        }
    }

    pub fn store(&self) -> &Arc<FaceStore> {
        &self.store
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Register the first face in `image` under `name`.
    ///
    /// Only the first face in detection order is stored, even when the image
    /// holds several; every detected face takes part in the duplicate check.
    /// Nothing is written unless all checks pass. Re-registering an existing
    /// name with a sufficiently different face replaces it.
    pub fn register<E: FeatureExtractor + ?Sized>(
        &self,
        extractor: &mut E,
        image: &RgbImage,
        name: &str,
    ) -> Result<Registration, ServiceError> {
        imaging::ensure_not_empty(image)?;
        if name.is_empty() {
            return Err(ServiceError::InvalidInput("name missing".into()));
        }
        validate_identity(name)?;

        let faces = extract_faces(extractor, image)?;

        // Extraction is pure, so only the check-then-write needs the lock.
        let mut store = self.store.write();

        let probes: Vec<FeatureVector> = faces.iter().map(|f| f.features.clone()).collect();
        if let Some(hit) =
            self.matcher
                .find_duplicate(&probes, store.records(), self.thresholds.duplicate)
        {
            tracing::info!(
                name,
                existing = %hit.name,
                similarity = hit.similarity,
                "registration refused: duplicate face"
            );
            return Err(ServiceError::DuplicateFace {
                name: hit.name,
                similarity: hit.similarity,
            });
        }

        let faces_detected = faces.len();
        let Some(first) = faces.into_iter().next() else {
            return Err(ServiceError::NoFaceDetected);
        };
        if faces_detected > 1 {
            tracing::info!(name, faces = faces_detected, "multiple faces; registering the first");
        }
        if first.features.is_empty() {
            tracing::warn!(name, "first face has no landmarks; it will never match");
        }

        store.put(name, first.features)?;
        tracing::info!(name, faces = faces_detected, "face registered");

        Ok(Registration {
            name: name.to_string(),
            faces_detected,
        })
    }

    /// Match every face in `image` against the store, in detection order.
    ///
    /// A face with no stored match above the recognition threshold is
    /// reported with no name and confidence 0.
    pub fn recognize<E: FeatureExtractor + ?Sized>(
        &self,
        extractor: &mut E,
        image: &RgbImage,
    ) -> Result<Vec<FaceMatch>, ServiceError> {
        imaging::ensure_not_empty(image)?;
        let faces = extract_faces(extractor, image)?;

        let gallery = self.store.read();
        let matches: Vec<FaceMatch> = faces
            .into_iter()
            .map(|face| {
                let result =
                    self.matcher
                        .compare(&face.features, &gallery, self.thresholds.recognition);
                FaceMatch {
                    bbox: face.bbox,
                    name: result.name,
                    confidence: result.similarity,
                }
            })
            .collect();
        drop(gallery);

        tracing::info!(
            faces = matches.len(),
            recognized = matches.iter().filter(|m| m.name.is_some()).count(),
            "recognition complete"
        );
        Ok(matches)
    }
}

fn extract_faces<E: FeatureExtractor + ?Sized>(
    extractor: &mut E,
    image: &RgbImage,
) -> Result<Vec<DetectedFace>, ServiceError> {
    let faces = extractor.extract(image)?;
    if faces.is_empty() {
        return Err(ServiceError::NoFaceDetected);
    }
    Ok(faces)
}
