#![allow(dead_code)]

use facemesh_core::extractor::ExtractorError;
use facemesh_core::{
    DetectedFace, FaceBox, FaceService, FaceStore, FeatureExtractor, FeatureVector, Thresholds,
};
use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::sync::Arc;

/// Landmarks in a full refined mesh (478 points × xyz).
pub const MESH_LEN: usize = 478 * 3;

/// Deterministic pseudo-landmarks in [0, 1) for a given seed.
pub fn landmarks(seed: u64) -> FeatureVector {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let values = (0..MESH_LEN)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 40) as f32 / (1u64 << 24) as f32
        })
        .collect();
    FeatureVector::new(values)
}

/// `base` with every coordinate shifted by `delta`.
///
/// Distance to `base` is `delta * sqrt(MESH_LEN)`, about `delta * 37.9`.
pub fn shifted(base: &FeatureVector, delta: f32) -> FeatureVector {
    FeatureVector::new(base.values.iter().map(|v| v + delta).collect())
}

pub fn face_at(x: u32, features: FeatureVector) -> DetectedFace {
    DetectedFace {
        bbox: FaceBox { x, y: 8, width: 40, height: 48 },
        features,
    }
}

/// A test image tagged by the red channel of its top-left pixel.
pub fn tagged_image(tag: u8) -> RgbImage {
    let mut img = RgbImage::from_pixel(64, 64, Rgb([90, 90, 90]));
    img.put_pixel(0, 0, Rgb([tag, 0, 0]));
    img
}

/// Returns pre-scripted faces for each tagged image; untagged images have none.
#[derive(Default, Clone)]
pub struct ScriptedExtractor {
    scripts: HashMap<u8, Vec<DetectedFace>>,
    pub calls: usize,
}

impl ScriptedExtractor {
    pub fn with(mut self, tag: u8, faces: Vec<DetectedFace>) -> Self {
        self.scripts.insert(tag, faces);
        self
    }
}

impl FeatureExtractor for ScriptedExtractor {
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractorError> {
        self.calls += 1;
        let tag = image.get_pixel(0, 0)[0];
        Ok(self.scripts.get(&tag).cloned().unwrap_or_default())
    }
}

pub fn test_service(dir: &std::path::Path) -> FaceService {
    let store = Arc::new(FaceStore::open(dir).expect("open store"));
    FaceService::new(store, Thresholds::default())
}
