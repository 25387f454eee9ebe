//! HTTP surface.
//!
//! - `POST /process_image` - multipart field `image`, one result per face
//! - `GET /status` - version and gallery summary

use crate::engine::EngineHandle;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

const IMAGE_FIELD: &str = "image";

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub references: Vec<String>,
    pub skipped: Vec<String>,
    pub metric: String,
    pub threshold: f32,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: error.into() })).into_response()
}

/// Pull the bytes of the first `image` field, ignoring any other fields.
async fn read_image_field(mut multipart: Multipart) -> Result<Option<Vec<u8>>, MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMAGE_FIELD) {
            return Ok(Some(field.bytes().await?.to_vec()));
        }
    }
    Ok(None)
}

/// POST /process_image
async fn process_image(
    State(engine): State<EngineHandle>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let Ok(multipart) = multipart else {
        return error_response(StatusCode::BAD_REQUEST, "No image provided");
    };

    let image = match read_image_field(multipart).await {
        Ok(Some(image)) => image,
        Ok(None) => return error_response(StatusCode::BAD_REQUEST, "No image provided"),
        Err(err) => {
            tracing::warn!(error = %err, "process_image: unreadable upload");
            return error_response(err.status(), err.body_text());
        }
    };

    match engine.process(image).await {
        Ok(results) => {
            tracing::info!(
                faces = results.len(),
                matched = results.iter().filter(|r| r.matched).count(),
                "process_image"
            );
            (StatusCode::OK, Json(results)).into_response()
        }
        Err(err) => {
            tracing::warn!(error = %err, "process_image failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

/// GET /status
async fn status(State(engine): State<EngineHandle>) -> Json<StatusResponse> {
    let gallery = engine.gallery();
    let matcher = engine.matcher();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        references: gallery.names().map(str::to_string).collect(),
        skipped: gallery.skipped().iter().map(|s| s.name.clone()).collect(),
        metric: matcher.metric.to_string(),
        threshold: matcher.threshold,
    })
}

/// Create the axum router
pub fn create_router(engine: EngineHandle, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/process_image", post(process_image))
        .route("/status", get(status))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}
