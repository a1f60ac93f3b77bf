//! Feature extraction: detect faces, crop each one, run the mesh on the crop.

use crate::detector::{DetectorError, FaceDetector};
use crate::imaging;
use crate::landmarks::{LandmarkError, LandmarkModel};
use crate::types::{DetectedFace, FaceBox, FeatureVector};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the face mesh model inside the model directory.
pub const MESH_MODEL_FILE: &str = "face_landmark.onnx";

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("landmark error: {0}")]
    Landmarks(#[from] LandmarkError),
}

/// Produces one [`DetectedFace`] per face found in an RGB image.
///
/// An empty `Vec` means no face was found; an `Err` means the call itself
/// failed. Implementations keep no per-image state between calls.
pub trait FeatureExtractor {
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractorError>;
}

impl<E: FeatureExtractor + ?Sized> FeatureExtractor for Box<E> {
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractorError> {
        (**self).extract(image)
    }
}

/// SCRFD detection followed by face mesh landmarks on each crop.
pub struct MeshExtractor {
    detector: FaceDetector,
    mesh: LandmarkModel,
}

impl MeshExtractor {
    pub fn new(detector: FaceDetector, mesh: LandmarkModel) -> Self {
        Self { detector, mesh }
    }

    /// Load both models from `model_dir` using their default file names.
    pub fn load(model_dir: &Path, detection_confidence: f32) -> Result<Self, ExtractorError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE), detection_confidence)?;
        let mesh = LandmarkModel::load(&model_dir.join(MESH_MODEL_FILE))?;
        Ok(Self::new(detector, mesh))
    }
}

impl FeatureExtractor for MeshExtractor {
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractorError> {
        let (width, height) = image.dimensions();
        let detections = self.detector.detect(image)?;

        let mut faces = Vec::with_capacity(detections.len());
        for det in &detections {
            let bbox = FaceBox::clamped(det.x, det.y, det.width, det.height, width, height);
            let features = if bbox.is_empty() {
                FeatureVector::default()
            } else {
                self.mesh.extract(&imaging::crop(image, &bbox))?
            };

            tracing::debug!(
                score = det.score,
                x = bbox.x,
                y = bbox.y,
                width = bbox.width,
                height = bbox.height,
                landmarks = features.len() / 3,
                "face extracted"
            );
            faces.push(DetectedFace { bbox, features });
        }

        Ok(faces)
    }
}
