//! HTTP surface: `GET /` and the `POST /api/upload` publish endpoint.

pub mod error;
pub mod upload;

pub use error::{ErrorResponse, WebError};
pub use upload::{UPLOAD_RECEIVED, UploadResponse};

use crate::publish::AssetPublisher;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Room for the text fields and multipart framing around the image.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<AssetPublisher>,
}

impl AppState {
    pub fn new(publisher: AssetPublisher) -> Self {
        Self {
            publisher: Arc::new(publisher),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.publisher.settings().max_image_bytes + FORM_OVERHEAD_BYTES;

    Router::new()
        .route("/", get(upload::hello))
        .route("/api/upload", post(upload::upload))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
