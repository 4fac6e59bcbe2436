//! Utility functions shared across the crate.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tempfile::TempPath;

use crate::error::{Error, Result};

/// Give up looking for a free output name after this many suffixes.
const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// Timestamp format used in compiled file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Get the user's config directory following XDG conventions.
///
/// Returns `$XDG_CONFIG_HOME` if set, otherwise `$HOME/.config`.
pub fn config_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
}

/// File stem of a path, or `"document"` when it has none.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string())
}

/// Make a user-supplied title safe to use as a file name component.
///
/// Path separators and control characters become `_`; surrounding whitespace
/// and dots are trimmed. Returns `None` when nothing usable remains.
pub fn sanitize_title(title: &str) -> Option<String> {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

/// `{title}_{YYYYMMDD_HHMMSS}`
pub fn compiled_file_stem(title: &str, at: DateTime<Local>) -> String {
    format!("{}_{}", title, at.format(TIMESTAMP_FORMAT))
}

/// Move a finished file to `{stem}.pdf` in `dir`, or `{stem}_2.pdf`,
/// `{stem}_3.pdf` and so on when that name is taken.
///
/// The name is claimed atomically, so an existing file is never replaced and
/// concurrent callers always end up with distinct paths. The staged file is
/// deleted when no name can be claimed.
pub fn persist_unique(staged: TempPath, dir: &Path, stem: &str) -> Result<PathBuf> {
    let mut staged = staged;
    for attempt in 1..=MAX_NAME_ATTEMPTS {
        let candidate = if attempt == 1 {
            dir.join(format!("{stem}.pdf"))
        } else {
            dir.join(format!("{stem}_{attempt}.pdf"))
        };
        match staged.persist_noclobber(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => staged = e.path,
            Err(e) => return Err(Error::Io(e.error)),
        }
    }
    Err(Error::Io(std::io::Error::other(format!(
        "no free file name for {stem} in {}",
        dir.display()
    ))))
}
