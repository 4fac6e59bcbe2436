//! Office documents to PDF through an external conversion engine.
//!
//! The engine is a capability ([`OfficeEngine`]) so tests can substitute a
//! fake; [`SofficeEngine`] drives a LibreOffice-compatible binary:
//!
//! ```text
//! soffice --headless --convert-to pdf --outdir <out_dir> <absolute source>
//! ```
//!
//! Each conversion spawns its own process. [`OfficeConverter`] bounds how many
//! run at once, enforces the timeout and checks that the PDF actually appeared.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{Converter, ToolLocator, expected_output};
use crate::error::{Error, Result};

/// Stderr kept for diagnostics.
const MAX_STDERR_BYTES: usize = 4096;

/// Something that can render an office document into `out_dir/{stem}.pdf`.
#[async_trait]
pub trait OfficeEngine: Send + Sync {
    async fn convert(&self, source: &Path, out_dir: &Path, timeout: Duration) -> Result<()>;
}

/// LibreOffice (`soffice`) invoked as a child process.
pub struct SofficeEngine {
    locator: Arc<ToolLocator>,
}

impl SofficeEngine {
    pub const fn new(locator: Arc<ToolLocator>) -> Self {
        Self { locator }
    }
}

#[async_trait]
impl OfficeEngine for SofficeEngine {
    async fn convert(&self, source: &Path, out_dir: &Path, timeout: Duration) -> Result<()> {
        let binary = self.locator.locate().await?;
        let source = std::path::absolute(source)?;
        let out_dir = std::path::absolute(out_dir)?;

        debug!("Running {} on {}", binary.display(), source.display());
        let started = Instant::now();

        let mut child = Command::new(&binary)
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(&out_dir)
            .arg(&source)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    "Office conversion of {} exceeded {}s, killing engine",
                    source.display(),
                    timeout.as_secs()
                );
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(Error::Timeout {
                    seconds: timeout.as_secs(),
                });
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(Error::ToolError {
                code: status.code(),
                stderr: truncate_stderr(&stderr),
            });
        }

        info!(
            "Converted {} in {:.1}s",
            source.display(),
            started.elapsed().as_secs_f32()
        );
        Ok(())
    }
}

fn truncate_stderr(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(&raw[..raw.len().min(MAX_STDERR_BYTES)]);
    text.trim().to_string()
}

/// [`Converter`] for office formats.
pub struct OfficeConverter {
    engine: Arc<dyn OfficeEngine>,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl OfficeConverter {
    /// At most `max_concurrent` engine invocations run at once.
    pub fn new(engine: Arc<dyn OfficeEngine>, timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            engine,
            timeout,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }
}

#[async_trait]
impl Converter for OfficeConverter {
    fn name(&self) -> &'static str {
        "office"
    }

    async fn convert(&self, source: &Path, out_dir: &Path) -> Result<PathBuf> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::ToolUnavailable)?;

        let expected = expected_output(source, out_dir);

        tokio::time::timeout(self.timeout, self.engine.convert(source, out_dir, self.timeout))
            .await
            .map_err(|_| Error::Timeout {
                seconds: self.timeout.as_secs(),
            })??;

        if !tokio::fs::try_exists(&expected).await.unwrap_or(false) {
            return Err(Error::OutputMissing(expected));
        }
        Ok(expected)
    }
}
