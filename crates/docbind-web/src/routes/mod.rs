//! HTTP route handlers for the docbind web service.
//!
//! All routes return JSON except `/api/pdf/generate`, which streams the
//! compiled PDF back as an attachment.

mod documents;
mod generate;

pub use documents::{get_document, list_documents, upload_document};
pub use generate::generate_pdf;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub office_available: bool,
}

/// Liveness plus whether office documents can be converted on this host.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        office_available: state.pipeline.office_available().await,
    })
}

/// All API routes, without middleware.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/documents", post(upload_document).get(list_documents))
        .route("/api/documents/{id}", get(get_document))
        .route("/api/pdf/generate", post(generate_pdf))
        .with_state(state)
}
