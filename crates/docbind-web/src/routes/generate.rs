//! Compilation route - merge stored documents and download the result.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::Response,
};
use docbind_core::CompilationRequest;
use tracing::info;

use crate::helpers::{ResultExt, RouteResult, pipeline_error};
use crate::state::AppState;

/// Compile the requested documents and return the PDF as an attachment.
pub async fn generate_pdf(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CompilationRequest>,
) -> RouteResult<Response> {
    let compiled = state
        .pipeline
        .compile(&request)
        .await
        .map_err(|e| pipeline_error(&e))?;

    let data = tokio::fs::read(&compiled.path).await.or_internal_error()?;
    let download_name = compiled
        .path
        .file_name()
        .map_or_else(|| "compilation.pdf".to_string(), |n| n.to_string_lossy().into_owned());

    info!(
        "Serving {} ({} pages, {} documents skipped)",
        download_name,
        compiled.page_count,
        compiled.skipped.len()
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/pdf")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{download_name}\""),
        )
        .header("X-Page-Count", compiled.page_count.to_string())
        .body(Body::from(data))
        .or_internal_error()
}
