//! Format classification of uploaded files.

use serde::{Deserialize, Serialize};

use crate::store::SourceFile;

/// How the pipeline treats a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    Pdf,
    Image,
    OfficeDocument,
    Unsupported,
}

impl FormatKind {
    /// Whether a PDF rendering has to be produced for this kind.
    pub const fn needs_conversion(self) -> bool {
        matches!(self, Self::Image | Self::OfficeDocument)
    }
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp"];

const OFFICE_EXTENSIONS: &[&str] = &[
    "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "rtf",
];

const OFFICE_MIME_TYPES: &[&str] = &[
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.oasis.opendocument.text",
    "application/vnd.oasis.opendocument.spreadsheet",
    "application/vnd.oasis.opendocument.presentation",
    "application/rtf",
    "text/rtf",
];

/// Classify a file extension. Case-insensitive; a leading dot is ignored.
pub fn classify_extension(extension: &str) -> FormatKind {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    if ext == "pdf" {
        FormatKind::Pdf
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        FormatKind::Image
    } else if OFFICE_EXTENSIONS.contains(&ext.as_str()) {
        FormatKind::OfficeDocument
    } else {
        FormatKind::Unsupported
    }
}

/// Classify a declared MIME type (parameters such as `; charset=` are ignored).
pub fn classify_mime(mime: &str) -> FormatKind {
    let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if essence == "application/pdf" {
        FormatKind::Pdf
    } else if essence.starts_with("image/")
        && IMAGE_EXTENSIONS.contains(&essence.trim_start_matches("image/"))
    {
        FormatKind::Image
    } else if OFFICE_MIME_TYPES.contains(&essence.as_str()) {
        FormatKind::OfficeDocument
    } else {
        FormatKind::Unsupported
    }
}

/// Classify a source file by extension, falling back to its declared MIME type.
pub fn classify_source(source: &SourceFile) -> FormatKind {
    match classify_extension(&source.extension) {
        FormatKind::Unsupported => source
            .declared_mime_type
            .as_deref()
            .map_or(FormatKind::Unsupported, classify_mime),
        kind => kind,
    }
}
