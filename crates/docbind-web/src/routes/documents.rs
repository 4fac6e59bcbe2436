//! Document routes - upload and lookup.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use axum_extra::extract::Multipart;
use docbind_core::{DocumentId, DocumentRecord, Scheduled, SourceFile};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::helpers::{OptionExt, ResultExt, RouteResult, safe_file_name};
use crate::state::AppState;

/// Response body for a successful upload.
#[derive(Serialize)]
pub struct UploadResponse {
    pub document: DocumentRecord,
    pub conversion: Scheduled,
}

/// Store an uploaded file and queue its PDF conversion.
///
/// Expects a `file` field and an optional `title` field. The response is sent
/// as soon as the file is stored; conversion runs in the background.
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> RouteResult<(StatusCode, Json<UploadResponse>)> {
    let mut title = None;
    let mut stored: Option<(PathBuf, Option<String>, u64)> = None;

    while let Some(field) = multipart.next_field().await.or_bad_request()? {
        match field.name().unwrap_or("") {
            "title" => {
                let text = field.text().await.or_bad_request()?;
                title = Some(text.trim().to_string()).filter(|t| !t.is_empty());
            }
            "file" => {
                let filename = field
                    .file_name()
                    .and_then(safe_file_name)
                    .unwrap_or_else(|| "upload".to_string());
                let declared = field.content_type().map(str::to_string);
                let data = field.bytes().await.or_bad_request()?;

                // One directory per upload keeps the client's file name intact
                let dir = state.upload_dir().join(Uuid::new_v4().to_string());
                tokio::fs::create_dir_all(&dir).await.or_internal_error()?;
                let path = dir.join(&filename);
                tokio::fs::write(&path, &data).await.or_internal_error()?;

                let mime = declared.or_else(|| mime_guess::from_path(&path).first().map(|m| m.to_string()));
                stored = Some((path, mime, data.len() as u64));
            }
            _ => {}
        }
    }

    let (path, mime, size) =
        stored.ok_or_else(|| (StatusCode::BAD_REQUEST, "No file uploaded".to_string()))?;
    let source = SourceFile::new(&path, mime);
    let title = title.unwrap_or_else(|| source.stem());

    let id = state.store.insert(title, source.clone(), size).await;
    let conversion = state.pipeline.schedule_conversion(source, id);
    info!("Stored document {} at {} ({} bytes), conversion {:?}", id, path.display(), size, conversion);

    let document = state
        .store
        .get(id)
        .await
        .or_not_found("Document not found")?;
    Ok((StatusCode::CREATED, Json(UploadResponse { document, conversion })))
}

/// List every stored document.
pub async fn list_documents(State(state): State<Arc<AppState>>) -> Json<Vec<DocumentRecord>> {
    Json(state.store.list().await)
}

/// Show one document, including its converted PDF once available.
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> RouteResult<Json<DocumentRecord>> {
    state
        .store
        .get(DocumentId(id))
        .await
        .map(Json)
        .or_not_found("Document not found")
}
