//! Request and reply bodies exchanged with HTTP clients.
//!
//! Every reply carries an explicit `success` flag. Domain failures are
//! successful transports with `success: false`.

use crate::service::{Registration, ServiceError};
use crate::types::FaceMatch;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Image as a `data:` URL or bare base64.
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecognizeRequest {
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterReply {
    pub success: bool,
    pub message: String,
}

impl RegisterReply {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl From<Result<Registration, ServiceError>> for RegisterReply {
    fn from(result: Result<Registration, ServiceError>) -> Self {
        match result {
            Ok(registration) => Self {
                success: true,
                message: registration.message(),
            },
            Err(err) => Self::failure(err.to_string()),
        }
    }
}

/// One recognized (or unknown) face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceReport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub name: Option<String>,
    pub confidence: f32,
}

impl From<FaceMatch> for FaceReport {
    fn from(m: FaceMatch) -> Self {
        Self {
            x: m.bbox.x,
            y: m.bbox.y,
            width: m.bbox.width,
            height: m.bbox.height,
            name: m.name,
            confidence: m.confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizeReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faces: Option<Vec<FaceReport>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RecognizeReply {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            faces: None,
            message: Some(message.into()),
        }
    }
}

impl From<Result<Vec<FaceMatch>, ServiceError>> for RecognizeReply {
    fn from(result: Result<Vec<FaceMatch>, ServiceError>) -> Self {
        match result {
            Ok(matches) => Self {
                success: true,
                faces: Some(matches.into_iter().map(FaceReport::from).collect()),
                message: None,
            },
            Err(err) => Self::failure(err.to_string()),
        }
    }
}
