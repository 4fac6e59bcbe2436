use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Prefix of environment overrides, e.g. `DOCBIND__OFFICE__TIMEOUT_SECS=60`.
pub const ENV_PREFIX: &str = "DOCBIND";

/// Where uploads, converted PDFs and compilations live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Converted PDFs, named `{document_id}_{stem}.pdf`
    #[serde(default = "default_pdf_output_dir")]
    pub pdf_output_dir: PathBuf,

    /// Compiled bundles, named `{title}_{YYYYMMDD_HHMMSS}.pdf`
    #[serde(default = "default_compilation_dir")]
    pub compilation_dir: PathBuf,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_pdf_output_dir() -> PathBuf {
    PathBuf::from("converted_pdfs")
}

fn default_compilation_dir() -> PathBuf {
    PathBuf::from("generated_pdfs")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            pdf_output_dir: default_pdf_output_dir(),
            compilation_dir: default_compilation_dir(),
        }
    }
}

impl StorageConfig {
    /// All directories rooted under `base`.
    pub fn rooted_at(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            upload_dir: base.join(default_upload_dir()),
            pdf_output_dir: base.join(default_pdf_output_dir()),
            compilation_dir: base.join(default_compilation_dir()),
        }
    }

    /// Create every configured directory.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.upload_dir, &self.pdf_output_dir, &self.compilation_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Office conversion engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfficeConfig {
    /// Explicit engine binary; falls through to PATH and well-known locations when missing
    #[serde(default)]
    pub binary_path: Option<PathBuf>,

    /// Kill the engine after this many seconds
    #[serde(default = "default_office_timeout_secs")]
    pub timeout_secs: u64,

    /// Engine processes allowed to run at once
    #[serde(default = "default_office_max_concurrent")]
    pub max_concurrent: usize,
}

const fn default_office_timeout_secs() -> u64 {
    300
}

const fn default_office_max_concurrent() -> usize {
    1
}

impl Default for OfficeConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            timeout_secs: default_office_timeout_secs(),
            max_concurrent: default_office_max_concurrent(),
        }
    }
}

impl OfficeConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Background conversion queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Pending jobs held before new ones are rejected
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Conversions running at once (office conversions are further limited by `office.max_concurrent`)
    #[serde(default = "default_workers")]
    pub workers: usize,
}

const fn default_queue_capacity() -> usize {
    64
}

const fn default_workers() -> usize {
    4
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
        }
    }
}

/// Header band drawn on compiled PDFs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderConfig {
    #[serde(default = "default_header_font_size")]
    pub font_size: f32,

    /// Height of the top band in points; the separator rule sits at its lower edge
    #[serde(default = "default_header_band_height")]
    pub band_height: f32,

    /// TrueType font to embed (needed for non-Latin header text); Helvetica otherwise
    #[serde(default)]
    pub font_path: Option<PathBuf>,
}

const fn default_header_font_size() -> f32 {
    10.0
}

const fn default_header_band_height() -> f32 {
    36.0
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            font_size: default_header_font_size(),
            band_height: default_header_band_height(),
            font_path: None,
        }
    }
}

/// Compilation defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Title used when a request carries none
    #[serde(default = "default_title")]
    pub default_title: String,

    #[serde(default = "default_true")]
    pub add_bookmarks: bool,
}

fn default_title() -> String {
    "Compilation".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            default_title: default_title(),
            add_bookmarks: true,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub office: OfficeConfig,

    #[serde(default)]
    pub conversion: ConversionConfig,

    #[serde(default)]
    pub header: HeaderConfig,

    #[serde(default)]
    pub compile: CompileConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::ConfigLoad(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigLoad(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Layer ~/.config/docbind/config.toml, ./docbind.toml and `DOCBIND__*`
    /// environment variables, later sources overriding earlier ones.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(config_dir) = crate::util::config_dir() {
            let user_config = config_dir.join("docbind").join("config.toml");
            tracing::debug!("Looking for config at {}", user_config.display());
            builder = builder.add_source(config::File::from(user_config).required(false));
        }

        let config: Self = builder
            .add_source(config::File::with_name("docbind").required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::ConfigLoad(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, reason: &str| Error::ConfigInvalid {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if self.office.timeout_secs == 0 {
            return Err(invalid("office.timeout_secs", "must be greater than zero"));
        }
        if self.office.max_concurrent == 0 {
            return Err(invalid("office.max_concurrent", "must be greater than zero"));
        }
        if self.conversion.queue_capacity == 0 {
            return Err(invalid("conversion.queue_capacity", "must be greater than zero"));
        }
        if self.conversion.workers == 0 {
            return Err(invalid("conversion.workers", "must be greater than zero"));
        }
        if self.header.font_size.is_nan() || self.header.font_size <= 0.0 {
            return Err(invalid("header.font_size", "must be positive"));
        }
        if self.header.band_height.is_nan() || self.header.band_height <= 0.0 {
            return Err(invalid("header.band_height", "must be positive"));
        }
        if crate::util::sanitize_title(&self.compile.default_title).is_none() {
            return Err(invalid("compile.default_title", "must contain a usable file name"));
        }
        Ok(())
    }
}
