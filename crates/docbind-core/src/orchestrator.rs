//! Background conversion of uploaded documents.
//!
//! [`ConversionQueue::schedule`] classifies a stored source and, when it needs
//! converting, pushes a job onto a bounded queue without awaiting anything. A
//! dispatcher task hands jobs to at most `conversion.workers` concurrent
//! workers. Each worker converts into a private staging directory, moves the
//! result to `{pdf_output_dir}/{document_id}_{stem}.pdf` and asks the document
//! store to record it. A name that is already taken, for example by an
//! earlier conversion of the same document, gets a `_2`, `_3` suffix instead
//! of being overwritten.
//!
//! Failures never reach the caller of `schedule`: they are logged with the
//! document id and failure kind, and published as a [`ConversionReport`].

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tempfile::TempPath;
use tokio::sync::{Mutex, Notify, Semaphore, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ConversionConfig;
use crate::convert::{ConversionOutcome, Converter};
use crate::error::{Error, Result};
use crate::format::FormatKind;
use crate::store::{DocumentId, DocumentStore, SourceFile};
use crate::util::persist_unique;

const REPORT_CHANNEL_CAPACITY: usize = 256;

/// What `schedule` did with a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheduled {
    /// Already a PDF; nothing to do
    Skipped,
    /// No converter handles this format
    Unsupported,
    /// Accepted for background conversion
    Queued,
    /// The queue is full or shut down
    Rejected,
}

/// Published once per finished (or refused) conversion.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub document_id: DocumentId,
    pub source: PathBuf,
    pub outcome: ConversionOutcome,
}

/// The converters selected by format.
#[derive(Clone)]
pub struct Converters {
    pub image: Arc<dyn Converter>,
    pub office: Arc<dyn Converter>,
}

impl Converters {
    pub fn new(image: Arc<dyn Converter>, office: Arc<dyn Converter>) -> Self {
        Self { image, office }
    }

    fn for_kind(&self, kind: FormatKind) -> Option<&dyn Converter> {
        match kind {
            FormatKind::Image => Some(self.image.as_ref()),
            FormatKind::OfficeDocument => Some(self.office.as_ref()),
            FormatKind::Pdf | FormatKind::Unsupported => None,
        }
    }
}

struct Job {
    document_id: DocumentId,
    source: SourceFile,
}

struct Worker {
    store: Arc<dyn DocumentStore>,
    converters: Converters,
    output_dir: PathBuf,
    reports: broadcast::Sender<ConversionReport>,
}

impl Worker {
    async fn run(&self, document_id: DocumentId, source: &SourceFile) -> ConversionOutcome {
        let outcome = match self.convert(document_id, source).await {
            Ok((path, size)) => {
                info!(
                    "Document {} converted to {} ({} bytes)",
                    document_id,
                    path.display(),
                    size
                );
                ConversionOutcome::success(path, size)
            }
            Err(e) => {
                error!(
                    document_id = %document_id,
                    kind = %e.failure_kind(),
                    "Conversion of {} failed: {}",
                    source.path.display(),
                    e
                );
                ConversionOutcome::failure(&e)
            }
        };
        self.report(document_id, source, outcome.clone());
        outcome
    }

    async fn convert(&self, document_id: DocumentId, source: &SourceFile) -> Result<(PathBuf, u64)> {
        let converter = self
            .converters
            .for_kind(source.kind())
            .ok_or_else(|| Error::UnsupportedFormat(source.extension.clone()))?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.output_dir)?;

        debug!(
            "Converting document {} with the {} converter",
            document_id,
            converter.name()
        );
        let produced = converter.convert(&source.path, staging.path()).await?;

        // Claim a name no earlier conversion holds; a recorded PDF stays untouched
        let stem = format!("{}_{}", document_id, source.stem());
        let output_dir = self.output_dir.clone();
        let final_path = tokio::task::spawn_blocking(move || {
            persist_unique(TempPath::from_path(produced), &output_dir, &stem)
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(format!("conversion task failed: {e}"))))??;
        let size = tokio::fs::metadata(&final_path).await?.len();

        if let Err(e) = self.store.persist_pdf_metadata(document_id, size, &final_path).await {
            // Only the file this attempt created goes away
            let _ = tokio::fs::remove_file(&final_path).await;
            return Err(e);
        }
        Ok((final_path, size))
    }

    fn report(&self, document_id: DocumentId, source: &SourceFile, outcome: ConversionOutcome) {
        // No subscribers is fine
        let _ = self.reports.send(ConversionReport {
            document_id,
            source: source.path.clone(),
            outcome,
        });
    }
}

/// Bounded background conversion queue.
///
/// Must be created inside a tokio runtime; the dispatcher is spawned eagerly.
pub struct ConversionQueue {
    worker: Arc<Worker>,
    sender: mpsc::Sender<Job>,
    shutdown: Arc<Notify>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ConversionQueue {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        converters: Converters,
        output_dir: impl Into<PathBuf>,
        config: &ConversionConfig,
    ) -> Self {
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        let worker = Arc::new(Worker {
            store,
            converters,
            output_dir: output_dir.into(),
            reports,
        });

        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let shutdown = Arc::new(Notify::new());
        let dispatcher = tokio::spawn(dispatch(
            Arc::clone(&worker),
            receiver,
            config.workers.max(1),
            Arc::clone(&shutdown),
        ));

        Self {
            worker,
            sender,
            shutdown,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Observe outcomes of conversions finishing after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversionReport> {
        self.worker.reports.subscribe()
    }

    /// Hand a newly stored source to the background workers. Never waits.
    pub fn schedule(&self, source: SourceFile, document_id: DocumentId) -> Scheduled {
        match source.kind() {
            FormatKind::Pdf => {
                debug!("Document {} is already a PDF, no conversion needed", document_id);
                self.worker
                    .report(document_id, &source, ConversionOutcome::skipped());
                return Scheduled::Skipped;
            }
            FormatKind::Unsupported => {
                let err = Error::UnsupportedFormat(source.extension.clone());
                warn!(
                    document_id = %document_id,
                    kind = %err.failure_kind(),
                    "Not converting {}: {}",
                    source.path.display(),
                    err
                );
                self.worker
                    .report(document_id, &source, ConversionOutcome::failure(&err));
                return Scheduled::Unsupported;
            }
            FormatKind::Image | FormatKind::OfficeDocument => {}
        }

        match self.sender.try_send(Job { document_id, source }) {
            Ok(()) => {
                debug!("Queued conversion of document {}", document_id);
                Scheduled::Queued
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                error!(
                    document_id = %job.document_id,
                    "Conversion queue is full, dropping {}",
                    job.source.path.display()
                );
                Scheduled::Rejected
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(
                    document_id = %job.document_id,
                    "Conversion queue is shut down, dropping {}",
                    job.source.path.display()
                );
                Scheduled::Rejected
            }
        }
    }

    /// Look a document up in the store and schedule it.
    pub async fn schedule_document(&self, document_id: DocumentId) -> Result<Scheduled> {
        let source = self.worker.store.document_source(document_id).await?;
        Ok(self.schedule(source, document_id))
    }

    /// Convert on the caller's task and wait for the outcome.
    pub async fn convert_now(&self, source: &SourceFile, document_id: DocumentId) -> ConversionOutcome {
        if source.kind() == FormatKind::Pdf {
            return ConversionOutcome::skipped();
        }
        self.worker.run(document_id, source).await
    }

    /// Stop accepting jobs, finish everything already queued, then return.
    pub async fn shutdown(&self) {
        self.shutdown.notify_one();
        if let Some(handle) = self.dispatcher.lock().await.take()
            && let Err(e) = handle.await
        {
            error!("Conversion dispatcher panicked: {}", e);
        }
    }
}

async fn dispatch(
    worker: Arc<Worker>,
    mut receiver: mpsc::Receiver<Job>,
    workers: usize,
    shutdown: Arc<Notify>,
) {
    let permits = Arc::new(Semaphore::new(workers));
    let mut closing = false;

    loop {
        let next = if closing {
            receiver.recv().await
        } else {
            tokio::select! {
                job = receiver.recv() => job,
                () = shutdown.notified() => {
                    debug!("Conversion queue closing, draining pending jobs");
                    receiver.close();
                    closing = true;
                    continue;
                }
            }
        };
        let Some(job) = next else { break };

        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let worker = Arc::clone(&worker);
        tokio::spawn(async move {
            worker.run(job.document_id, &job.source).await;
            drop(permit);
        });
    }

    // Wait for in-flight conversions
    let all = u32::try_from(workers).unwrap_or(u32::MAX);
    let _ = permits.acquire_many(all).await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::convert::{ConversionStatus, FailureKind, ImageConverter, expected_output};
    use crate::store::{CompilationSource, MemoryDocumentStore};
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes a stub `{stem}.pdf` once the gate opens.
    struct StubConverter {
        gate: Arc<Semaphore>,
        fail_with: Option<fn() -> Error>,
    }

    impl StubConverter {
        fn open() -> Self {
            Self {
                gate: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
                fail_with: None,
            }
        }
    }

    #[async_trait]
    impl Converter for StubConverter {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn convert(&self, source: &Path, out_dir: &Path) -> Result<PathBuf> {
            let _pass = self.gate.acquire().await.map_err(|_| Error::ToolUnavailable)?;
            if let Some(fail) = self.fail_with {
                return Err(fail());
            }
            let output = expected_output(source, out_dir);
            tokio::fs::write(&output, b"%PDF-1.4\n%%EOF\n").await?;
            Ok(output)
        }
    }

    /// Delegates to a [`MemoryDocumentStore`] but refuses every recording
    /// after the first `accept` ones.
    struct RefusingStore {
        inner: Arc<MemoryDocumentStore>,
        accept: usize,
        recorded: AtomicUsize,
    }

    #[async_trait]
    impl DocumentStore for RefusingStore {
        async fn document_source(&self, id: DocumentId) -> Result<SourceFile> {
            self.inner.document_source(id).await
        }

        async fn persist_pdf_metadata(&self, id: DocumentId, pdf_size: u64, pdf_path: &Path) -> Result<()> {
            if self.recorded.fetch_add(1, Ordering::SeqCst) >= self.accept {
                return Err(Error::Io(std::io::Error::other("store offline")));
            }
            self.inner.persist_pdf_metadata(id, pdf_size, pdf_path).await
        }

        async fn compilation_sources(&self, ids: &[DocumentId]) -> Result<Vec<CompilationSource>> {
            self.inner.compilation_sources(ids).await
        }
    }

    fn config(queue_capacity: usize, workers: usize) -> ConversionConfig {
        ConversionConfig {
            queue_capacity,
            workers,
        }
    }

    fn stub_converters(office: StubConverter) -> Converters {
        Converters::new(Arc::new(StubConverter::open()), Arc::new(office))
    }

    #[tokio::test]
    async fn test_pdf_is_skipped_without_work() {
        let out = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryDocumentStore::new());
        let source = SourceFile::new("/uploads/native.pdf", None);
        let id = store.insert("native", source.clone(), 10).await;

        let queue = ConversionQueue::new(
            store.clone(),
            stub_converters(StubConverter::open()),
            out.path(),
            &config(4, 1),
        );
        let mut reports = queue.subscribe();

        assert_eq!(queue.schedule(source, id), Scheduled::Skipped);
        let report = reports.recv().await.unwrap();
        assert_eq!(report.outcome.status, ConversionStatus::Skipped);

        queue.shutdown().await;
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
        assert!(store.get(id).await.unwrap().pdf.pdf_save_path.is_none());
    }

    #[tokio::test]
    async fn test_png_is_converted_and_recorded() {
        let uploads = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let png = uploads.path().join("scan.png");
        RgbImage::from_pixel(800, 600, Rgb([9, 9, 9])).save(&png).unwrap();

        let store = Arc::new(MemoryDocumentStore::new());
        let source = SourceFile::new(&png, Some("image/png".to_string()));
        let id = store.insert("scan", source.clone(), 1).await;

        let queue = ConversionQueue::new(
            store.clone(),
            Converters::new(Arc::new(ImageConverter), Arc::new(StubConverter::open())),
            out.path(),
            &config(4, 2),
        );
        let mut reports = queue.subscribe();
        assert_eq!(queue.schedule(source, id), Scheduled::Queued);

        let report = reports.recv().await.unwrap();
        assert!(report.outcome.is_success());
        let expected = out.path().join(format!("{id}_scan.pdf"));
        assert_eq!(report.outcome.pdf_path.as_deref(), Some(expected.as_path()));

        let record = store.get(id).await.unwrap();
        assert_eq!(record.pdf.pdf_save_path, Some(expected.clone()));
        assert!(record.pdf.pdf_file_size > 0);
        assert_eq!(record.pdf.pdf_file_size, std::fs::metadata(&expected).unwrap().len());

        let doc = lopdf::Document::load(&expected).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_same_stem_documents_do_not_collide() {
        let out = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryDocumentStore::new());
        let a = SourceFile::new("/inbox/a/report.docx", None);
        let b = SourceFile::new("/inbox/b/report.docx", None);
        let id_a = store.insert("a", a.clone(), 1).await;
        let id_b = store.insert("b", b.clone(), 1).await;

        let queue = ConversionQueue::new(
            store.clone(),
            stub_converters(StubConverter::open()),
            out.path(),
            &config(4, 2),
        );
        assert_eq!(queue.convert_now(&a, id_a).await.status, ConversionStatus::Success);
        assert_eq!(queue.convert_now(&b, id_b).await.status, ConversionStatus::Success);

        assert!(out.path().join(format!("{id_a}_report.pdf")).exists());
        assert!(out.path().join(format!("{id_b}_report.pdf")).exists());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconversion_keeps_recorded_pdf() {
        let out = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryDocumentStore::new());
        let source = SourceFile::new("/inbox/scan.docx", None);
        let id = store.insert("scan", source.clone(), 1).await;

        let queue = ConversionQueue::new(
            store.clone(),
            stub_converters(StubConverter::open()),
            out.path(),
            &config(4, 1),
        );
        let first = queue.convert_now(&source, id).await;
        assert_eq!(first.status, ConversionStatus::Success);
        let recorded = out.path().join(format!("{id}_scan.pdf"));
        assert_eq!(first.pdf_path.as_deref(), Some(recorded.as_path()));

        let second = queue.convert_now(&source, id).await;
        assert_eq!(second.status, ConversionStatus::Success);
        let suffixed = out.path().join(format!("{id}_scan_2.pdf"));
        assert_eq!(second.pdf_path.as_deref(), Some(suffixed.as_path()));

        assert!(recorded.exists());
        assert_eq!(store.get(id).await.unwrap().pdf.pdf_save_path, Some(suffixed));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_recording_leaves_earlier_pdf_in_place() {
        let out = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryDocumentStore::new());
        let source = SourceFile::new("/inbox/scan.docx", None);
        let id = memory.insert("scan", source.clone(), 1).await;
        let store = Arc::new(RefusingStore {
            inner: Arc::clone(&memory),
            accept: 1,
            recorded: AtomicUsize::new(0),
        });

        let queue = ConversionQueue::new(store, stub_converters(StubConverter::open()), out.path(), &config(4, 1));
        assert_eq!(queue.convert_now(&source, id).await.status, ConversionStatus::Success);
        let recorded = out.path().join(format!("{id}_scan.pdf"));
        let original = std::fs::read(&recorded).unwrap();

        let retry = queue.convert_now(&source, id).await;
        assert_eq!(retry.status, ConversionStatus::Failure);

        assert_eq!(memory.get(id).await.unwrap().pdf.pdf_save_path, Some(recorded.clone()));
        assert_eq!(std::fs::read(&recorded).unwrap(), original);
        let left: Vec<_> = std::fs::read_dir(out.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(left, vec![recorded]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_leaves_metadata_unset() {
        let out = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryDocumentStore::new());
        let source = SourceFile::new("/inbox/deck.pptx", None);
        let id = store.insert("deck", source.clone(), 1).await;

        let failing = StubConverter {
            gate: Arc::new(Semaphore::new(1)),
            fail_with: Some(|| Error::ToolUnavailable),
        };
        let queue = ConversionQueue::new(store.clone(), stub_converters(failing), out.path(), &config(4, 1));

        let outcome = queue.convert_now(&source, id).await;
        assert_eq!(outcome.status, ConversionStatus::Failure);
        assert_eq!(outcome.error_kind, Some(FailureKind::ToolUnavailable));
        assert!(store.get(id).await.unwrap().pdf.pdf_save_path.is_none());
        // Staging directory is cleaned up
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsupported_is_reported_not_queued() {
        let out = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryDocumentStore::new());
        let source = SourceFile::new("/inbox/archive.zip", None);
        let id = store.insert("zip", source.clone(), 1).await;

        let queue = ConversionQueue::new(
            store,
            stub_converters(StubConverter::open()),
            out.path(),
            &config(4, 1),
        );
        let mut reports = queue.subscribe();
        assert_eq!(queue.schedule(source, id), Scheduled::Unsupported);
        let report = reports.recv().await.unwrap();
        assert_eq!(report.outcome.error_kind, Some(FailureKind::UnsupportedFormat));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_rejects_and_shutdown_drains() {
        let out = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryDocumentStore::new());
        let gate = Arc::new(Semaphore::new(0));
        let blocked = StubConverter {
            gate: Arc::clone(&gate),
            fail_with: None,
        };
        let queue = ConversionQueue::new(store.clone(), stub_converters(blocked), out.path(), &config(1, 1));

        let mut ids = Vec::new();
        let mut results = Vec::new();
        for i in 0..6 {
            let source = SourceFile::new(format!("/inbox/doc{i}.odt"), None);
            let id = store.insert(format!("doc{i}"), source.clone(), 1).await;
            ids.push(id);
            results.push(queue.schedule(source, id));
        }
        assert!(results.contains(&Scheduled::Rejected));
        let queued = results.iter().filter(|r| **r == Scheduled::Queued).count();
        assert!(queued >= 1);

        gate.add_permits(Semaphore::MAX_PERMITS / 2);
        queue.shutdown().await;

        let mut recorded = 0;
        for id in ids {
            if store.get(id).await.unwrap().pdf.pdf_save_path.is_some() {
                recorded += 1;
            }
        }
        assert_eq!(recorded, queued);

        let late = SourceFile::new("/inbox/late.odt", None);
        assert_eq!(queue.schedule(late, DocumentId(99)), Scheduled::Rejected);
    }

    #[tokio::test]
    async fn test_schedule_document_looks_up_source() {
        let out = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryDocumentStore::new());
        let queue = ConversionQueue::new(
            store.clone(),
            stub_converters(StubConverter::open()),
            out.path(),
            &config(4, 1),
        );
        let err = queue.schedule_document(DocumentId(42)).await.unwrap_err();
        assert!(matches!(err, Error::DocumentNotFound(DocumentId(42))));

        let id = store.insert("x", SourceFile::new("/inbox/x.pdf", None), 1).await;
        assert_eq!(queue.schedule_document(id).await.unwrap(), Scheduled::Skipped);
        queue.shutdown().await;
    }
}
