//! HTTP surface of the daemon.
//!
//! Routes:
//! - `POST /register`  `{image, name}` → `{success, message}`
//! - `POST /recognize` `{image}` → `{success, faces | message}`
//! - `GET /faces` → registered identity names
//! - `GET /status` → version, face count and thresholds
//!
//! Every reply carries `success`. Domain failures return 200, rejected
//! request bodies keep axum's 4xx status, and engine failures are 500.

use crate::engine::{EngineError, EngineHandle};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use facemesh_core::api::{RecognizeReply, RecognizeRequest, RegisterReply, RegisterRequest};
use facemesh_core::FaceService;
use serde::Serialize;
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub service: Arc<FaceService>,
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/recognize", post(recognize))
        .route("/faces", get(list_faces))
        .route("/status", get(status))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// A reply body plus the status code it travels with.
pub struct Reply<T>(StatusCode, T);

impl<T: Serialize> IntoResponse for Reply<T> {
    fn into_response(self) -> Response {
        (self.0, Json(self.1)).into_response()
    }
}

fn invalid_request(rejection: &JsonRejection) -> String {
    format!("invalid request data: {}", rejection.body_text())
}

fn internal(err: &EngineError) -> String {
    format!("internal error: {err}")
}

pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Reply<RegisterReply> {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "register body rejected");
            return Reply(rejection.status(), RegisterReply::failure(invalid_request(&rejection)));
        }
    };
    tracing::info!(name = %req.name, "register requested");
    match state.engine.register(req.image, req.name).await {
        Ok(registration) => Reply(StatusCode::OK, RegisterReply::from(Ok(registration))),
        Err(EngineError::Service(err)) => Reply(StatusCode::OK, RegisterReply::from(Err(err))),
        Err(err) => {
            tracing::error!(error = %err, "register failed");
            Reply(StatusCode::INTERNAL_SERVER_ERROR, RegisterReply::failure(internal(&err)))
        }
    }
}

pub async fn recognize(
    State(state): State<AppState>,
    body: Result<Json<RecognizeRequest>, JsonRejection>,
) -> Reply<RecognizeReply> {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "recognize body rejected");
            return Reply(rejection.status(), RecognizeReply::failure(invalid_request(&rejection)));
        }
    };
    tracing::info!("recognize requested");
    match state.engine.recognize(req.image).await {
        Ok(matches) => Reply(StatusCode::OK, RecognizeReply::from(Ok(matches))),
        Err(EngineError::Service(err)) => Reply(StatusCode::OK, RecognizeReply::from(Err(err))),
        Err(err) => {
            tracing::error!(error = %err, "recognize failed");
            Reply(StatusCode::INTERNAL_SERVER_ERROR, RecognizeReply::failure(internal(&err)))
        }
    }
}

pub async fn list_faces(State(state): State<AppState>) -> Json<serde_json::Value> {
    let names = state.service.store().names();
    Json(serde_json::json!({ "success": true, "names": names }))
}

pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let store = state.service.store();
    let thresholds = state.service.thresholds();
    Json(serde_json::json!({
        "success": true,
        "version": env!("CARGO_PKG_VERSION"),
        "faces": store.len(),
        "data_dir": store.dir().display().to_string(),
        "duplicate_threshold": thresholds.duplicate,
        "recognition_threshold": thresholds.recognition,
    }))
}
