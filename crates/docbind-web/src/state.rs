use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use docbind_core::{AppConfig, MemoryDocumentStore, Pipeline};

/// Global application state
pub struct AppState {
    /// Upload registry; stands in for the relational document table
    pub store: Arc<MemoryDocumentStore>,
    pub pipeline: Pipeline,
}

impl AppState {
    /// Build the pipeline over a fresh in-memory store.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: AppConfig) -> Result<Self> {
        let store = Arc::new(MemoryDocumentStore::new());
        let pipeline = Pipeline::new(config, store.clone())
            .map_err(|e| anyhow::anyhow!("Failed to create pipeline: {e}"))?;
        Ok(Self { store, pipeline })
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.pipeline.config().storage.upload_dir.clone()
    }
}
