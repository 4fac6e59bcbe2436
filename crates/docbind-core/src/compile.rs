//! Assembling stored documents into one bookmarked PDF.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::CompileConfig;
use crate::error::{Error, Result};
use crate::pdf::{BookmarkEntry, HeaderStamper, MergeSource, merge_documents, save_new};
use crate::store::{CompilationSource, DocumentId, DocumentStore};
use crate::util::{compiled_file_stem, file_stem, sanitize_title};

/// A request to compile documents, in the order given.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompilationRequest {
    pub document_ids: Vec<DocumentId>,

    /// Output title; the configured default when absent or unusable
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub add_header: bool,

    /// Header line; the title when absent
    #[serde(default)]
    pub header_text: Option<String>,
}

impl CompilationRequest {
    pub fn new(document_ids: impl IntoIterator<Item = DocumentId>) -> Self {
        Self {
            document_ids: document_ids.into_iter().collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, text: Option<String>) -> Self {
        self.add_header = true;
        self.header_text = text;
        self
    }
}

/// A compiled output file. The caller owns it.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledPdf {
    pub path: PathBuf,
    pub page_count: u32,
    pub bookmarks: Vec<BookmarkEntry>,
    /// Requested documents without a usable PDF
    pub skipped: Vec<DocumentId>,
}

/// Pick the PDF to merge for each document.
///
/// A converted PDF that exists on disk wins; otherwise a document that is
/// itself a PDF is used as is; anything else is skipped. Bookmarks are titled
/// with the stem of the original upload.
pub fn select_sources(candidates: &[CompilationSource]) -> (Vec<MergeSource>, Vec<DocumentId>) {
    let mut selected = Vec::with_capacity(candidates.len());
    let mut skipped = Vec::new();

    for candidate in candidates {
        let title = file_stem(&candidate.fallback_original_path);
        match &candidate.preferred_pdf_path {
            Some(converted) if converted.is_file() => {
                selected.push(MergeSource::titled(converted, title));
            }
            _ if candidate.is_already_pdf => {
                selected.push(MergeSource::titled(&candidate.fallback_original_path, title));
            }
            _ => {
                warn!(
                    document_id = %candidate.document_id,
                    "Document {} has no usable PDF representation, skipping",
                    candidate.document_id
                );
                skipped.push(candidate.document_id);
            }
        }
    }
    (selected, skipped)
}

/// Builds compilations into the compilation directory.
pub struct Compiler {
    store: Arc<dyn DocumentStore>,
    output_dir: PathBuf,
    config: CompileConfig,
    header: HeaderStamper,
}

impl Compiler {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        output_dir: impl Into<PathBuf>,
        config: CompileConfig,
        header: HeaderStamper,
    ) -> Self {
        Self {
            store,
            output_dir: output_dir.into(),
            config,
            header,
        }
    }

    /// Merge the requested documents and return the written file.
    ///
    /// Unknown ids fail with [`Error::DocumentNotFound`]; every other failure
    /// is reported as [`Error::PdfGeneration`] and leaves no output behind.
    pub async fn compile(&self, request: &CompilationRequest) -> Result<CompiledPdf> {
        let candidates = self.store.compilation_sources(&request.document_ids).await?;
        self.build(request, &candidates).await.map_err(Error::generation)
    }

    async fn build(&self, request: &CompilationRequest, candidates: &[CompilationSource]) -> Result<CompiledPdf> {
        let (selected, skipped) = select_sources(candidates);
        if selected.is_empty() {
            return Err(Error::NoUsableSources);
        }

        let title = request
            .title
            .as_deref()
            .and_then(sanitize_title)
            .or_else(|| sanitize_title(&self.config.default_title))
            .unwrap_or_else(|| "Compilation".to_string());
        let header_text = request.add_header.then(|| {
            request
                .header_text
                .clone()
                .filter(|t| !t.trim().is_empty())
                .or_else(|| request.title.clone())
                .unwrap_or_else(|| title.clone())
        });

        let stem = compiled_file_stem(&title, Local::now());
        let add_bookmarks = self.config.add_bookmarks;
        let stamper = self.header.clone();
        let dir = self.output_dir.clone();
        let (merged, output) = tokio::task::spawn_blocking(move || {
            let mut merged = merge_documents(&selected, add_bookmarks)?;
            if let Some(text) = header_text {
                stamper.stamp(&mut merged.document, &text)?;
                merged.document.compress();
            }
            let output = save_new(&mut merged.document, &dir, &stem)?;
            Ok::<_, Error>((merged, output))
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(format!("compilation task failed: {e}"))))??;

        info!(
            "Compiled {} documents into {} ({} pages, {} skipped)",
            request.document_ids.len() - skipped.len(),
            output.display(),
            merged.page_count,
            skipped.len()
        );

        Ok(CompiledPdf {
            path: output,
            page_count: merged.page_count,
            bookmarks: merged.bookmarks,
            skipped,
        })
    }
}
