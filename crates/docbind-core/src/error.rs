use std::path::PathBuf;

use thiserror::Error;

use crate::convert::FailureKind;
use crate::store::DocumentId;

/// Unified error type for docbind-core
///
/// This enum encompasses all error cases that can occur in the library:
/// - Format classification and background conversion
/// - PDF merging, bookmarking and header stamping
/// - Document store lookups
/// - Configuration operations (loading, validation)
/// - General I/O operations
#[derive(Error, Debug)]
pub enum Error {
    // ==========================================================================
    // Conversion Errors
    // ==========================================================================
    /// The file extension (and declared MIME type) maps to no known format
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The office conversion engine could not be located on this host
    #[error("office conversion engine not available")]
    ToolUnavailable,

    /// The office conversion engine exited with a non-zero status
    #[error("office conversion engine failed ({}): {stderr}", code.map_or_else(|| "killed by signal".to_string(), |c| format!("exit code {c}")))]
    ToolError { code: Option<i32>, stderr: String },

    /// The office conversion engine exceeded its time budget and was killed
    #[error("office conversion timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// The converter reported success but the expected PDF is absent
    #[error("converter reported success but {} was not produced", .0.display())]
    OutputMissing(PathBuf),

    /// An image could not be read or decoded
    #[error("corrupt input: {0}")]
    CorruptInput(String),

    // ==========================================================================
    // PDF / Compilation Errors
    // ==========================================================================
    /// A merge input vanished before it could be read
    #[error("source PDF missing: {}", .0.display())]
    SourceMissing(PathBuf),

    /// None of the requested documents has a usable PDF representation
    #[error("no usable PDF sources among the requested documents")]
    NoUsableSources,

    /// Error from the lopdf library
    #[error("lopdf error: {0}")]
    Lopdf(String),

    /// Failed to save a PDF
    #[error("failed to save PDF: {0}")]
    PdfSave(String),

    /// Compilation failed; wraps the underlying merge-path reason
    #[error("PDF generation failed: {0}")]
    PdfGeneration(Box<Error>),

    // ==========================================================================
    // Document Store Errors
    // ==========================================================================
    /// The document store has no record for this id
    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),

    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    /// Failed to load configuration file
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    /// Invalid configuration value
    #[error("invalid config value for '{field}': {reason}")]
    ConfigInvalid { field: String, reason: String },

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a merge-path error into the generic compilation failure.
    ///
    /// Already-wrapped errors are returned unchanged.
    pub fn generation(inner: Self) -> Self {
        match inner {
            Self::PdfGeneration(_) => inner,
            other => Self::PdfGeneration(Box::new(other)),
        }
    }

    /// The underlying reason of a compilation failure, or `self` otherwise.
    pub fn root(&self) -> &Self {
        match self {
            Self::PdfGeneration(inner) => inner.root(),
            other => other,
        }
    }

    /// Classify this error for a conversion outcome.
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::UnsupportedFormat(_) => FailureKind::UnsupportedFormat,
            Self::ToolUnavailable => FailureKind::ToolUnavailable,
            Self::ToolError { .. } => FailureKind::ToolError,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::OutputMissing(_) => FailureKind::OutputMissing,
            Self::CorruptInput(_) => FailureKind::CorruptInput,
            _ => FailureKind::Io,
        }
    }
}

impl From<lopdf::Error> for Error {
    fn from(e: lopdf::Error) -> Self {
        Self::Lopdf(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
