//! Producing PDF renderings of non-PDF sources.
//!
//! Each [`Converter`] writes `{stem}.pdf` into the output directory it is
//! handed and returns that path. The orchestrator picks the converter by
//! [`FormatKind`](crate::format::FormatKind).

mod image;
mod locator;
mod office;

pub use self::image::{ImageConverter, image_to_pdf};
pub use locator::ToolLocator;
pub use office::{OfficeConverter, OfficeEngine, SofficeEngine};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A source-to-PDF conversion capability.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Convert `source` and return the path of the produced `{stem}.pdf` in `out_dir`.
    async fn convert(&self, source: &Path, out_dir: &Path) -> Result<PathBuf>;
}

/// Where `{stem}.pdf` for `source` lands in `out_dir`.
pub fn expected_output(source: &Path, out_dir: &Path) -> PathBuf {
    out_dir.join(format!("{}.pdf", crate::util::file_stem(source)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStatus {
    Success,
    Failure,
    Skipped,
}

/// Why a background conversion failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnsupportedFormat,
    ToolUnavailable,
    ToolError,
    Timeout,
    OutputMissing,
    CorruptInput,
    /// Filesystem or PDF-writing failure, or a panicked worker
    Io,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::UnsupportedFormat => "unsupported_format",
            Self::ToolUnavailable => "tool_unavailable",
            Self::ToolError => "tool_error",
            Self::Timeout => "timeout",
            Self::OutputMissing => "output_missing",
            Self::CorruptInput => "corrupt_input",
            Self::Io => "io",
        };
        f.write_str(name)
    }
}

/// Result of converting one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOutcome {
    pub status: ConversionStatus,
    pub pdf_path: Option<PathBuf>,
    pub pdf_size: Option<u64>,
    pub error_kind: Option<FailureKind>,
    /// Human-readable failure reason
    pub error: Option<String>,
}

impl ConversionOutcome {
    pub const fn skipped() -> Self {
        Self {
            status: ConversionStatus::Skipped,
            pdf_path: None,
            pdf_size: None,
            error_kind: None,
            error: None,
        }
    }

    pub const fn success(pdf_path: PathBuf, pdf_size: u64) -> Self {
        Self {
            status: ConversionStatus::Success,
            pdf_path: Some(pdf_path),
            pdf_size: Some(pdf_size),
            error_kind: None,
            error: None,
        }
    }

    pub fn failure(error: &Error) -> Self {
        Self {
            status: ConversionStatus::Failure,
            pdf_path: None,
            pdf_size: None,
            error_kind: Some(error.failure_kind()),
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ConversionStatus::Success
    }
}
