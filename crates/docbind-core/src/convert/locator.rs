//! Finding the office conversion engine on the host.
//!
//! Resolution order:
//! 1. an explicitly configured path (a missing file is logged and skipped)
//! 2. the engine's binary names on the search path
//! 3. platform-specific install locations
//!
//! A successful resolution is cached for the lifetime of the locator. Callers
//! racing on the first resolution share one in-flight probe.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

#[cfg(windows)]
const BINARY_NAMES: &[&str] = &["soffice.exe", "soffice.com"];
#[cfg(not(windows))]
const BINARY_NAMES: &[&str] = &["soffice", "libreoffice"];

/// Install locations probed after the search path.
pub fn well_known_paths() -> Vec<PathBuf> {
    let paths: &[&str] = if cfg!(windows) {
        &[
            r"C:\Program Files\LibreOffice\program\soffice.exe",
            r"C:\Program Files (x86)\LibreOffice\program\soffice.exe",
            r"C:\Program Files\LibreOffice 7\program\soffice.exe",
        ]
    } else if cfg!(target_os = "macos") {
        &[
            "/Applications/LibreOffice.app/Contents/MacOS/soffice",
            "/usr/local/bin/soffice",
            "/opt/homebrew/bin/soffice",
        ]
    } else {
        &[
            "/usr/bin/soffice",
            "/usr/bin/libreoffice",
            "/usr/local/bin/soffice",
            "/usr/local/bin/libreoffice",
            "/opt/libreoffice/program/soffice",
            "/snap/bin/libreoffice",
        ]
    };
    paths.iter().map(PathBuf::from).collect()
}

/// Resolves and caches the office engine path.
#[derive(Debug)]
pub struct ToolLocator {
    configured: Option<PathBuf>,
    search_path: Option<OsString>,
    binary_names: Vec<String>,
    well_known: Vec<PathBuf>,
    resolved: OnceCell<PathBuf>,
}

impl ToolLocator {
    /// Locator for this host: `PATH` from the environment and the platform's install locations.
    pub fn new(configured: Option<PathBuf>) -> Self {
        Self {
            configured,
            search_path: std::env::var_os("PATH"),
            binary_names: BINARY_NAMES.iter().map(|s| (*s).to_string()).collect(),
            well_known: well_known_paths(),
            resolved: OnceCell::new(),
        }
    }

    /// Replace the search path consulted in step 2.
    #[must_use]
    pub fn with_search_path(mut self, search_path: Option<OsString>) -> Self {
        self.search_path = search_path;
        self
    }

    /// Replace the install locations consulted in step 3.
    #[must_use]
    pub fn with_well_known(mut self, paths: Vec<PathBuf>) -> Self {
        self.well_known = paths;
        self
    }

    /// Replace the binary names looked up on the search path.
    #[must_use]
    pub fn with_binary_names(mut self, names: Vec<String>) -> Self {
        self.binary_names = names;
        self
    }

    /// The cached engine path, if resolution already succeeded.
    pub fn cached(&self) -> Option<&Path> {
        self.resolved.get().map(PathBuf::as_path)
    }

    /// Resolve the engine path, probing the filesystem at most once per success.
    ///
    /// Returns [`Error::ToolUnavailable`] when nothing resolves; a later call probes again.
    pub async fn locate(&self) -> Result<PathBuf> {
        self.resolved
            .get_or_try_init(|| async {
                let found = self.probe().ok_or(Error::ToolUnavailable)?;
                info!("Office conversion engine found at {}", found.display());
                Ok::<_, Error>(found)
            })
            .await
            .cloned()
    }

    fn probe(&self) -> Option<PathBuf> {
        if let Some(configured) = &self.configured {
            if is_executable_file(configured) {
                return Some(configured.clone());
            }
            warn!(
                "Configured office engine {} does not exist, searching elsewhere",
                configured.display()
            );
        }

        if let Some(search_path) = &self.search_path {
            for dir in std::env::split_paths(search_path) {
                for name in &self.binary_names {
                    let candidate = dir.join(name);
                    if is_executable_file(&candidate) {
                        debug!("Found {} on search path", candidate.display());
                        return Some(candidate);
                    }
                }
            }
        }

        let found = self.well_known.iter().find(|p| is_executable_file(p)).cloned();
        if found.is_none() {
            warn!("No office conversion engine found; office documents will not be converted");
        }
        found
    }
}

fn is_executable_file(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}
