//! Face mesh landmark model via ONNX Runtime.
//!
//! Runs a MediaPipe-style face mesh network on a face crop and returns its
//! 3D landmarks flattened into a [`FeatureVector`]. The network emits 468
//! (or 478 with iris refinement) points in input-pixel units; they are
//! divided by the input size so x/y land in [0, 1] relative to the crop and
//! z shares the x scale.

use crate::types::FeatureVector;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const MESH_INPUT_SIZE: usize = 192;
const MESH_MIN_LANDMARKS: usize = 468;
/// Minimum face-presence probability for the landmarks to be trusted.
const MESH_PRESENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("mesh model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Which session outputs carry the landmarks and the presence logit.
#[derive(Debug, Clone, Copy, PartialEq)]
struct MeshOutputs {
    landmarks: usize,
    presence: Option<usize>,
}

/// Face mesh landmark extractor.
pub struct LandmarkModel {
    session: Session,
    outputs: Option<MeshOutputs>,
}

impl LandmarkModel {
    /// Load the face mesh ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, LandmarkError> {
        if !model_path.exists() {
            return Err(LandmarkError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face mesh model"
        );

        Ok(Self {
            session,
            outputs: None,
        })
    }

    /// Extract flattened landmarks from a face crop.
    ///
    /// Returns an empty vector when the model reports no face in the crop.
    pub fn extract(&mut self, face: &RgbImage) -> Result<FeatureVector, LandmarkError> {
        let input = preprocess(face);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut lengths = Vec::with_capacity(outputs.len());
        let mut tensors = Vec::with_capacity(outputs.len());
        for (_, value) in outputs.iter() {
            let (_, data) = value
                .try_extract_tensor::<f32>()
                .map_err(|e| LandmarkError::InferenceFailed(format!("mesh output: {e}")))?;
            lengths.push(data.len());
            tensors.push(data.to_vec());
        }

        // Output layout is fixed per model, so discover it on the first run.
        let layout = match self.outputs {
            Some(layout) => layout,
            None => {
                let layout = discover_outputs(&lengths)?;
                tracing::debug!(?layout, "face mesh output mapping");
                self.outputs = Some(layout);
                layout
            }
        };

        if let Some(idx) = layout.presence {
            let presence = sigmoid(tensors[idx].first().copied().unwrap_or(f32::NEG_INFINITY));
            if presence < MESH_PRESENCE_THRESHOLD {
                tracing::debug!(presence, "face mesh found no face in crop");
                return Ok(FeatureVector::default());
            }
        }

        Ok(normalize_landmarks(&tensors[layout.landmarks]))
    }
}

/// Resize a crop to 192×192 and pack it NHWC in [0, 1].
fn preprocess(face: &RgbImage) -> Array4<f32> {
    let size = MESH_INPUT_SIZE as u32;
    let resized = image::imageops::resize(face, size, size, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, MESH_INPUT_SIZE, MESH_INPUT_SIZE, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Pick the landmark tensor (largest, multiple of 3, at least 468 points)
/// and the single-element presence logit, if the model has one.
fn discover_outputs(lengths: &[usize]) -> Result<MeshOutputs, LandmarkError> {
    let landmarks = lengths
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, len)| len % 3 == 0 && len >= MESH_MIN_LANDMARKS * 3)
        .max_by_key(|&(_, len)| len)
        .map(|(i, _)| i)
        .ok_or_else(|| {
            LandmarkError::InferenceFailed(format!(
                "no output holds {MESH_MIN_LANDMARKS}+ xyz landmarks (output sizes {lengths:?})"
            ))
        })?;
    let presence = lengths.iter().position(|&len| len == 1);
    Ok(MeshOutputs { landmarks, presence })
}

fn normalize_landmarks(raw: &[f32]) -> FeatureVector {
    let scale = MESH_INPUT_SIZE as f32;
    FeatureVector::new(raw.iter().map(|v| v / scale).collect())
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_shape_and_range() {
        let face = RgbImage::from_pixel(37, 53, Rgb([255, 0, 51]));
        let tensor = preprocess(&face);
        assert_eq!(tensor.shape(), &[1, MESH_INPUT_SIZE, MESH_INPUT_SIZE, 3]);
        assert!((tensor[[0, 96, 96, 0]] - 1.0).abs() < 0.01);
        assert!(tensor[[0, 96, 96, 1]].abs() < 0.01);
        assert!((tensor[[0, 96, 96, 2]] - 0.2).abs() < 0.01);
    }

    #[test]
    fn test_discover_outputs_plain_mesh() {
        // face_landmark: landmarks [1,1,1,1404] + presence [1,1,1,1]
        let layout = discover_outputs(&[1404, 1]).unwrap();
        assert_eq!(layout, MeshOutputs { landmarks: 0, presence: Some(1) });
    }

    #[test]
    fn test_discover_outputs_prefers_refined_mesh() {
        let layout = discover_outputs(&[1, 1404, 1434, 160]).unwrap();
        assert_eq!(layout.landmarks, 2);
        assert_eq!(layout.presence, Some(0));
    }

    #[test]
    fn test_discover_outputs_rejects_unknown_model() {
        assert!(discover_outputs(&[512]).is_err());
    }

    #[test]
    fn test_normalize_landmarks_keeps_order() {
        let fv = normalize_landmarks(&[96.0, 48.0, -19.2, 0.0, 192.0, 9.6]);
        let expected = [0.5, 0.25, -0.1, 0.0, 1.0, 0.05];
        assert_eq!(fv.len(), expected.len());
        for (got, want) in fv.values.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{got} vs {want}");
        }
    }

    #[test]
    fn test_sigmoid_midpoint() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(-20.0) < MESH_PRESENCE_THRESHOLD);
        assert!(sigmoid(20.0) > MESH_PRESENCE_THRESHOLD);
    }
}
