//! Docbind Core Library
//!
//! This library provides the document conversion and assembly pipeline:
//! - Format classification of uploaded files
//! - Background conversion of images and office documents to PDF
//! - Merging stored documents into one bookmarked PDF
//! - Header stamping of compiled PDFs

pub mod compile;
pub mod config;
pub mod convert;
pub mod error;
pub mod format;
pub mod orchestrator;
pub mod pdf;
pub mod store;
pub mod util;

pub use crate::compile::{CompilationRequest, CompiledPdf, Compiler, select_sources};
pub use crate::config::{
    AppConfig, CompileConfig, ConversionConfig, HeaderConfig, OfficeConfig, StorageConfig,
};
pub use crate::convert::{
    ConversionOutcome, ConversionStatus, Converter, FailureKind, ImageConverter, OfficeConverter,
    OfficeEngine, SofficeEngine, ToolLocator,
};
pub use crate::error::{Error, Result};
pub use crate::format::{FormatKind, classify_extension, classify_source};
pub use crate::orchestrator::{ConversionQueue, ConversionReport, Converters, Scheduled};
pub use crate::pdf::{BookmarkEntry, HeaderStamper, MergeSource, merge_pdfs, stamp_header_file};
pub use crate::store::{
    CompilationSource, DocumentId, DocumentPdfState, DocumentRecord, DocumentStore, MemoryDocumentStore,
    SourceFile,
};

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

/// High-level pipeline that wires conversion and compilation to a document store
pub struct Pipeline {
    config: AppConfig,
    locator: Arc<ToolLocator>,
    queue: ConversionQueue,
    compiler: Compiler,
}

impl Pipeline {
    /// Create a pipeline that converts office documents with the host's engine.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: AppConfig, store: Arc<dyn DocumentStore>) -> Result<Self> {
        let locator = Arc::new(ToolLocator::new(config.office.binary_path.clone()));
        let engine = Arc::new(SofficeEngine::new(Arc::clone(&locator)));
        Self::build(config, store, locator, engine)
    }

    /// Create with a custom office engine
    pub fn with_office_engine(
        config: AppConfig,
        store: Arc<dyn DocumentStore>,
        engine: Arc<dyn OfficeEngine>,
    ) -> Result<Self> {
        let locator = Arc::new(ToolLocator::new(config.office.binary_path.clone()));
        Self::build(config, store, locator, engine)
    }

    fn build(
        config: AppConfig,
        store: Arc<dyn DocumentStore>,
        locator: Arc<ToolLocator>,
        engine: Arc<dyn OfficeEngine>,
    ) -> Result<Self> {
        config.validate()?;
        config.storage.ensure_dirs()?;

        let office = OfficeConverter::new(engine, config.office.timeout(), config.office.max_concurrent);
        let queue = ConversionQueue::new(
            Arc::clone(&store),
            Converters::new(Arc::new(ImageConverter), Arc::new(office)),
            config.storage.pdf_output_dir.clone(),
            &config.conversion,
        );
        let compiler = Compiler::new(
            store,
            config.storage.compilation_dir.clone(),
            config.compile.clone(),
            HeaderStamper::from_config(&config.header)?,
        );

        info!(
            "Pipeline ready: converted PDFs in {}, compilations in {}",
            config.storage.pdf_output_dir.display(),
            config.storage.compilation_dir.display()
        );

        Ok(Self {
            config,
            locator,
            queue,
            compiler,
        })
    }

    /// Queue background conversion of a newly stored file. Never waits for it.
    pub fn schedule_conversion(&self, source: SourceFile, document_id: DocumentId) -> Scheduled {
        self.queue.schedule(source, document_id)
    }

    /// Convert a stored file and wait for the outcome.
    pub async fn convert_now(&self, source: &SourceFile, document_id: DocumentId) -> ConversionOutcome {
        self.queue.convert_now(source, document_id).await
    }

    /// Assemble the requested documents into one PDF.
    pub async fn compile(&self, request: &CompilationRequest) -> Result<CompiledPdf> {
        self.compiler.compile(request).await
    }

    /// Observe background conversion outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversionReport> {
        self.queue.subscribe()
    }

    /// Finish queued conversions and stop accepting new ones.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }

    /// Whether the office conversion engine can be found on this host.
    pub async fn office_available(&self) -> bool {
        self.locator.locate().await.is_ok()
    }

    pub const fn config(&self) -> &AppConfig {
        &self.config
    }
}
