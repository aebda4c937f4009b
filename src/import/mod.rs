//! Import processor and worker pool.
//!
//! The [`Processor`] turns a parsed segment manifest into virtual-file
//! records: it classifies the archive, drives the RAR/7z analyzers, and
//! persists one record per discovered inner file through the metadata
//! store. [`ImportPool`] runs imports inside a bounded pool of concurrent
//! workers. Each import call is independent; concurrent imports of
//! different archives have no interaction.

mod processor;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;

use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{AnalyzerConfig, ImportConfig};
use crate::error::{Error, Result};
use crate::metadata::MetadataStore;
use crate::segments::SegmentFetch;
use crate::types::ParsedArchive;

/// Processes parsed manifests into virtual-file records.
pub struct Processor {
    store: Arc<dyn MetadataStore>,
    fetch: Arc<dyn SegmentFetch>,
    config: ImportConfig,
    /// Analyzer settings snapshot, swapped atomically on reload. Readers
    /// clone the Arc under a read lock; a reload holds the write lock only
    /// for the pointer swap.
    analyzer_settings: RwLock<Arc<AnalyzerConfig>>,
}

impl Processor {
    /// Creates a processor over the given collaborators.
    pub fn new(
        store: Arc<dyn MetadataStore>,
        fetch: Arc<dyn SegmentFetch>,
        config: ImportConfig,
    ) -> Self {
        let analyzer_settings = RwLock::new(Arc::new(config.analyzer.clone()));
        Self {
            store,
            fetch,
            config,
            analyzer_settings,
        }
    }

    /// Current analyzer settings snapshot.
    pub async fn analyzer_settings(&self) -> Arc<AnalyzerConfig> {
        self.analyzer_settings.read().await.clone()
    }

    /// Applies new analyzer settings if they differ from the current ones.
    ///
    /// Double-checked: the comparison happens again under the write lock in
    /// case a concurrent reload already applied the same change.
    pub async fn reload_analyzer_settings(&self, desired: AnalyzerConfig) {
        {
            let current = self.analyzer_settings.read().await;
            if **current == desired {
                return;
            }
        }

        let mut guard = self.analyzer_settings.write().await;
        if **guard == desired {
            return;
        }
        info!(
            workers = desired.max_workers,
            cache_mb = desired.max_cache_size_mb,
            preload = desired.enable_memory_preload,
            "reloading analyzer settings"
        );
        *guard = Arc::new(desired);
    }

    pub(crate) fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub(crate) fn fetch(&self) -> &Arc<dyn SegmentFetch> {
        &self.fetch
    }
}

/// Bounded pool of concurrent import workers.
pub struct ImportPool {
    processor: Arc<Processor>,
    permits: Arc<Semaphore>,
}

impl ImportPool {
    /// Creates a pool sized from the processor's configuration.
    pub fn new(processor: Arc<Processor>) -> Self {
        let size = processor.config().max_concurrent_imports.max(1);
        Self {
            processor,
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    /// Spawns an import; the task waits for a pool permit before starting.
    pub fn spawn(
        &self,
        archive: ParsedArchive,
        base_path: String,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<Result<String>> {
        let processor = self.processor.clone();
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| Error::Other("import pool closed".into()))?;
            processor.import(archive, &base_path, &cancel).await
        })
    }
}
