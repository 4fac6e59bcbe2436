#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use docbind_core::pdf::outline_entries;
use docbind_core::{
    AppConfig, CompilationRequest, CompilationSource, ConversionReport, ConversionStatus,
    DocumentId, DocumentStore, Error, FailureKind, MemoryDocumentStore, MergeSource, OfficeEngine,
    Pipeline, Scheduled, SofficeEngine, SourceFile, StorageConfig, ToolLocator, merge_pdfs,
    stamp_header_file,
};
use image::{Rgb, RgbImage};
use lopdf::{Dictionary, Document, Object, Stream};
use tokio::sync::broadcast;

// =============================================================================
// Fixtures
// =============================================================================

fn write_pdf(path: &Path, pages: usize) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = (0..pages)
        .map(|i| {
            let content = format!("BT /F1 12 Tf 72 720 Td (Page {}) Tj ET", i + 1);
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
            Object::Reference(doc.add_object(Dictionary::from_iter([
                ("Type", Object::Name(b"Page".to_vec())),
                ("Parent", Object::Reference(pages_id)),
                ("Contents", Object::Reference(content_id)),
                ("MediaBox", Object::Array(vec![0.into(), 0.into(), 612.into(), 792.into()])),
            ])))
        })
        .collect();
    let count = i64::try_from(kids.len()).unwrap();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(kids)),
            ("Count", Object::Integer(count)),
        ])),
    );
    let catalog_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));
    doc.save(path).unwrap();
}

fn config_in(base: &Path) -> AppConfig {
    AppConfig {
        storage: StorageConfig::rooted_at(base),
        ..AppConfig::default()
    }
}

/// Produces a PDF with a fixed page count for every office document.
struct FakeOffice {
    pages: usize,
    delay: Duration,
}

#[async_trait]
impl OfficeEngine for FakeOffice {
    async fn convert(&self, source: &Path, out_dir: &Path, _timeout: Duration) -> docbind_core::Result<()> {
        tokio::time::sleep(self.delay).await;
        let stem = source.file_stem().unwrap().to_string_lossy().into_owned();
        write_pdf(&out_dir.join(format!("{stem}.pdf")), self.pages);
        Ok(())
    }
}

/// Counts metadata updates on top of the in-memory store.
#[derive(Default)]
struct CountingStore {
    inner: MemoryDocumentStore,
    persisted: AtomicUsize,
}

#[async_trait]
impl DocumentStore for CountingStore {
    async fn document_source(&self, id: DocumentId) -> docbind_core::Result<SourceFile> {
        self.inner.document_source(id).await
    }

    async fn persist_pdf_metadata(&self, id: DocumentId, pdf_size: u64, pdf_path: &Path) -> docbind_core::Result<()> {
        self.persisted.fetch_add(1, Ordering::SeqCst);
        self.inner.persist_pdf_metadata(id, pdf_size, pdf_path).await
    }

    async fn compilation_sources(&self, ids: &[DocumentId]) -> docbind_core::Result<Vec<CompilationSource>> {
        self.inner.compilation_sources(ids).await
    }
}

async fn next_report_for(reports: &mut broadcast::Receiver<ConversionReport>, id: DocumentId) -> ConversionReport {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let report = reports.recv().await.unwrap();
            if report.document_id == id {
                return report;
            }
        }
    })
    .await
    .unwrap()
}

// =============================================================================
// Conversion
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn uploaded_png_is_converted_in_background() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CountingStore::default());
    let pipeline = Pipeline::with_office_engine(
        config_in(dir.path()),
        store.clone(),
        Arc::new(FakeOffice { pages: 1, delay: Duration::ZERO }),
    )
    .unwrap();

    let png = dir.path().join("uploads").join("scan.png");
    RgbImage::from_pixel(800, 600, Rgb([120, 130, 140])).save(&png).unwrap();
    let source = SourceFile::new(&png, Some("image/png".to_string()));
    assert_eq!(source.kind(), docbind_core::FormatKind::Image);
    let id = store.inner.insert("scan", source.clone(), 1).await;

    let mut reports = pipeline.subscribe();
    assert_eq!(pipeline.schedule_conversion(source, id), Scheduled::Queued);
    let report = next_report_for(&mut reports, id).await;
    assert_eq!(report.outcome.status, ConversionStatus::Success);

    let record = store.inner.get(id).await.unwrap();
    let pdf_path = record.pdf.pdf_save_path.unwrap();
    assert!(record.pdf.pdf_file_size > 0);
    assert_eq!(store.persisted.load(Ordering::SeqCst), 1);

    let doc = Document::load(&pdf_path).unwrap();
    let pages = doc.get_pages();
    assert_eq!(pages.len(), 1);
    let page = doc.get_dictionary(*pages.get(&1).unwrap()).unwrap();
    let media_box: Vec<f32> = page
        .get(b"MediaBox")
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o.as_float().unwrap())
        .collect();
    assert_eq!(media_box, vec![0.0, 0.0, 800.0, 600.0]);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn native_pdf_is_skipped_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CountingStore::default());
    let pipeline = Pipeline::with_office_engine(
        config_in(dir.path()),
        store.clone(),
        Arc::new(FakeOffice { pages: 1, delay: Duration::ZERO }),
    )
    .unwrap();

    let pdf = dir.path().join("uploads").join("native.pdf");
    write_pdf(&pdf, 2);
    let source = SourceFile::new(&pdf, Some("application/pdf".to_string()));
    let id = store.inner.insert("native", source.clone(), 1).await;

    assert_eq!(pipeline.schedule_conversion(source, id), Scheduled::Skipped);
    pipeline.shutdown().await;

    let converted = std::fs::read_dir(dir.path().join("converted_pdfs")).unwrap().count();
    assert_eq!(converted, 0);
    assert_eq!(store.persisted.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn office_timeout_fails_without_blocking_the_caller() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.office.timeout_secs = 1;
    let store = Arc::new(MemoryDocumentStore::new());
    let pipeline = Pipeline::with_office_engine(
        config,
        store.clone(),
        Arc::new(FakeOffice { pages: 1, delay: Duration::from_secs(120) }),
    )
    .unwrap();

    let source = SourceFile::new(dir.path().join("uploads").join("slow.docx"), None);
    let id = store.insert("slow", source.clone(), 1).await;
    let mut reports = pipeline.subscribe();

    let scheduled_at = Instant::now();
    assert_eq!(pipeline.schedule_conversion(source, id), Scheduled::Queued);
    assert!(scheduled_at.elapsed() < Duration::from_millis(500));

    let report = next_report_for(&mut reports, id).await;
    assert_eq!(report.outcome.error_kind, Some(FailureKind::Timeout));
    assert!(scheduled_at.elapsed() < Duration::from_secs(10));
    assert!(store.get(id).await.unwrap().pdf.pdf_save_path.is_none());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn missing_engine_yields_tool_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let locator = ToolLocator::new(None)
        .with_search_path(None)
        .with_well_known(Vec::new());
    assert!(matches!(locator.locate().await, Err(Error::ToolUnavailable)));

    let store = Arc::new(MemoryDocumentStore::new());
    let pipeline = Pipeline::with_office_engine(
        config_in(dir.path()),
        store.clone(),
        Arc::new(SofficeEngine::new(Arc::new(locator))),
    )
    .unwrap();

    let source = SourceFile::new(dir.path().join("uploads").join("memo.docx"), None);
    let id = store.insert("memo", source.clone(), 1).await;
    let outcome = pipeline.convert_now(&source, id).await;

    assert_eq!(outcome.status, ConversionStatus::Failure);
    assert_eq!(outcome.error_kind, Some(FailureKind::ToolUnavailable));
    pipeline.shutdown().await;
}

// =============================================================================
// Compilation
// =============================================================================

#[tokio::test]
async fn compile_uses_converted_and_native_pdfs_and_skips_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryDocumentStore::new());
    let pipeline = Pipeline::with_office_engine(
        config_in(dir.path()),
        store.clone(),
        Arc::new(FakeOffice { pages: 3, delay: Duration::ZERO }),
    )
    .unwrap();
    let uploads = dir.path().join("uploads");

    // A: office document with a converted PDF
    let a_source = SourceFile::new(uploads.join("report.docx"), None);
    let a = store.insert("report", a_source.clone(), 1).await;
    assert!(pipeline.convert_now(&a_source, a).await.is_success());

    // B: native PDF
    let b_path = uploads.join("appendix.pdf");
    write_pdf(&b_path, 2);
    let b = store.insert("appendix", SourceFile::new(&b_path, None), 1).await;

    // C: neither
    let c = store.insert("photo", SourceFile::new(uploads.join("photo.png"), None), 1).await;

    let compiled = pipeline
        .compile(&CompilationRequest::new([a, b, c]).with_title("Quarterly"))
        .await
        .unwrap();

    assert_eq!(compiled.page_count, 5);
    assert_eq!(compiled.skipped, vec![c]);
    assert!(compiled.path.starts_with(dir.path().join("generated_pdfs")));

    let doc = Document::load(&compiled.path).unwrap();
    assert_eq!(doc.get_pages().len(), 5);
    let bookmarks = outline_entries(&doc);
    assert_eq!(bookmarks.len(), 2);
    assert_eq!(bookmarks[0].title, "report");
    assert_eq!(bookmarks[0].page_number, 1);
    assert_eq!(bookmarks[1].title, "appendix");
    assert_eq!(bookmarks[1].page_number, 4);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn compile_without_usable_sources_fails_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryDocumentStore::new());
    let pipeline = Pipeline::with_office_engine(
        config_in(dir.path()),
        store.clone(),
        Arc::new(FakeOffice { pages: 1, delay: Duration::ZERO }),
    )
    .unwrap();

    let id = store
        .insert("deck", SourceFile::new(dir.path().join("uploads/deck.pptx"), None), 1)
        .await;
    let err = pipeline.compile(&CompilationRequest::new([id])).await.unwrap_err();

    assert!(matches!(err, Error::PdfGeneration(_)));
    assert!(matches!(err.root(), Error::NoUsableSources));
    assert_eq!(std::fs::read_dir(dir.path().join("generated_pdfs")).unwrap().count(), 0);
    pipeline.shutdown().await;
}

// =============================================================================
// Merge and header
// =============================================================================

#[test]
fn merging_single_page_pdfs_bookmarks_each_page() {
    let dir = tempfile::tempdir().unwrap();
    let sources: Vec<MergeSource> = (1..=4)
        .map(|i| {
            let path: PathBuf = dir.path().join(format!("part{i}.pdf"));
            write_pdf(&path, 1);
            MergeSource::new(path)
        })
        .collect();
    let output = dir.path().join("merged.pdf");

    merge_pdfs(&sources, &output, true).unwrap();

    let doc = Document::load(&output).unwrap();
    assert_eq!(doc.get_pages().len(), 4);
    let numbers: Vec<u32> = outline_entries(&doc).iter().map(|b| b.page_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
}

#[test]
fn header_stamp_keeps_page_count() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bundle.pdf");
    write_pdf(&path, 3);

    stamp_header_file(&path, None, "Internal", 10.0, 36.0).unwrap();

    let doc = Document::load(&path).unwrap();
    assert_eq!(doc.get_pages().len(), 3);
    for page_id in doc.get_pages().values() {
        let page = doc.get_dictionary(*page_id).unwrap();
        let fonts = page
            .get(b"Resources")
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"Font")
            .unwrap()
            .as_dict()
            .unwrap();
        assert!(fonts.has(b"FHdr"));
    }
}
