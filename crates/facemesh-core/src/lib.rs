//! facemesh-core: face registration and recognition from face mesh landmarks.
//!
//! Faces are found with SCRFD and described by the flattened 3D landmarks
//! of a face mesh model, both run via ONNX Runtime. Identities live in a
//! directory of JSON feature files and are matched by Euclidean similarity.

pub mod api;
pub mod detector;
pub mod extractor;
pub mod imaging;
pub mod landmarks;
pub mod service;
pub mod store;
pub mod types;

pub use extractor::{ExtractorError, FeatureExtractor, MeshExtractor};
pub use service::{FaceService, Registration, ServiceError, Thresholds};
pub use store::{FaceStore, StoreError};
pub use types::{
    DetectedFace, FaceBox, FaceMatch, FeatureVector, Gallery, LandmarkMatcher, MatchResult,
    Matcher, DUPLICATE_THRESHOLD, RECOGNITION_THRESHOLD,
};
