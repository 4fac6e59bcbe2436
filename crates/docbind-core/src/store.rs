//! The document store seam.
//!
//! The relational store that owns documents, tags and categories lives outside
//! this crate. The pipeline only needs three things from it: the source file of
//! a document, a way to record a produced PDF, and the candidate PDF paths for a
//! compilation. [`MemoryDocumentStore`] is a small in-process implementation used
//! by the binaries and tests.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::format::{FormatKind, classify_source};

/// Identifier of a document row in the external store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DocumentId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// An uploaded file before any format conversion. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Lowercased extension without the leading dot (may be empty)
    pub extension: String,
    pub declared_mime_type: Option<String>,
}

impl SourceFile {
    /// Describe a stored file, deriving the extension from its path.
    pub fn new(path: impl Into<PathBuf>, declared_mime_type: Option<String>) -> Self {
        let path = path.into();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        Self {
            path,
            extension,
            declared_mime_type,
        }
    }

    pub fn kind(&self) -> FormatKind {
        classify_source(self)
    }

    /// File stem used to name derived PDFs.
    pub fn stem(&self) -> String {
        crate::util::file_stem(&self.path)
    }
}

/// The PDF metadata the pipeline requests updates for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPdfState {
    pub pdf_save_path: Option<PathBuf>,
    pub pdf_file_size: u64,
}

/// Candidate PDF representations of one requested document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationSource {
    pub document_id: DocumentId,
    pub preferred_pdf_path: Option<PathBuf>,
    pub fallback_original_path: PathBuf,
    pub is_already_pdf: bool,
}

/// What the pipeline consumes from the document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Look up the stored source file of a document.
    async fn document_source(&self, id: DocumentId) -> Result<SourceFile>;

    /// Record the PDF produced for a document.
    async fn persist_pdf_metadata(&self, id: DocumentId, pdf_size: u64, pdf_path: &Path) -> Result<()>;

    /// Resolve compilation candidates, in request order.
    async fn compilation_sources(&self, ids: &[DocumentId]) -> Result<Vec<CompilationSource>>;
}

/// A stored document as kept by [`MemoryDocumentStore`].
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub title: String,
    pub source: SourceFile,
    pub file_size: u64,
    #[serde(flatten)]
    pub pdf: DocumentPdfState,
}

/// In-memory [`DocumentStore`] with sequential ids.
#[derive(Default)]
pub struct MemoryDocumentStore {
    records: RwLock<HashMap<DocumentId, DocumentRecord>>,
    next_id: AtomicU64,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stored file and return its new id.
    pub async fn insert(&self, title: impl Into<String>, source: SourceFile, file_size: u64) -> DocumentId {
        let id = DocumentId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let record = DocumentRecord {
            id,
            title: title.into(),
            source,
            file_size,
            pdf: DocumentPdfState::default(),
        };
        self.records.write().await.insert(id, record);
        id
    }

    pub async fn get(&self, id: DocumentId) -> Option<DocumentRecord> {
        self.records.read().await.get(&id).cloned()
    }

    /// All records ordered by id.
    pub async fn list(&self) -> Vec<DocumentRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn document_source(&self, id: DocumentId) -> Result<SourceFile> {
        self.records
            .read()
            .await
            .get(&id)
            .map(|r| r.source.clone())
            .ok_or(Error::DocumentNotFound(id))
    }

    async fn persist_pdf_metadata(&self, id: DocumentId, pdf_size: u64, pdf_path: &Path) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(Error::DocumentNotFound(id))?;
        record.pdf = DocumentPdfState {
            pdf_save_path: Some(pdf_path.to_path_buf()),
            pdf_file_size: pdf_size,
        };
        debug!("Recorded PDF for document {}: {} ({} bytes)", id, pdf_path.display(), pdf_size);
        Ok(())
    }

    async fn compilation_sources(&self, ids: &[DocumentId]) -> Result<Vec<CompilationSource>> {
        let records = self.records.read().await;
        ids.iter()
            .map(|&id| {
                let record = records.get(&id).ok_or(Error::DocumentNotFound(id))?;
                Ok(CompilationSource {
                    document_id: id,
                    preferred_pdf_path: record.pdf.pdf_save_path.clone(),
                    fallback_original_path: record.source.path.clone(),
                    is_already_pdf: record.source.kind() == FormatKind::Pdf,
                })
            })
            .collect()
    }
}
