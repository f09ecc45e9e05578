//! Periodic dirty-region flush and startup load
//!
//! Owns the flush cycle: every few seconds the dirty set is snapshotted and
//! each dirty, non-empty region is written concurrently. A region whose
//! write fails stays dirty and is retried next cycle. On startup every
//! snapshot file in the storage directory is opened, with per-file failures
//! isolated so one corrupt file cannot abort the load.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::core::types::Result;
use crate::host::WorldResolver;
use crate::snapshot::registry::{DirtyTracker, RegionRegistry};
use crate::snapshot::store::{SnapshotStore, SNAPSHOT_EXTENSION};

/// Default interval between flush cycles
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Outcome of one flush cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushSummary {
    /// Regions written successfully
    pub written: usize,
    /// Regions that failed and stay dirty
    pub failed: usize,
    /// Regions skipped (deleted or empty)
    pub skipped: usize,
}

/// Outcome of the startup load
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub loaded: usize,
    pub failed: usize,
}

/// Orchestrates asynchronous save/load of region snapshots
pub struct PersistenceScheduler {
    registry: Arc<RegionRegistry>,
    dirty: Arc<DirtyTracker>,
    store: Arc<SnapshotStore>,
    dir: PathBuf,
    interval: Duration,
}

impl PersistenceScheduler {
    pub fn new(
        registry: Arc<RegionRegistry>,
        dirty: Arc<DirtyTracker>,
        store: Arc<SnapshotStore>,
        dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            dirty,
            store,
            dir,
            interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Directory holding the snapshot files
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Spawn the periodic flush loop on the current runtime
    pub fn spawn_flush_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let summary = self.flush_once().await;
                if summary.written > 0 || summary.failed > 0 {
                    log::debug!(
                        "flush cycle: {} written, {} failed, {} skipped",
                        summary.written,
                        summary.failed,
                        summary.skipped
                    );
                }
            }
        })
    }

    /// Run one flush cycle over the current dirty set
    pub async fn flush_once(&self) -> FlushSummary {
        let dirty = self.dirty.take();
        if dirty.is_empty() {
            return FlushSummary::default();
        }

        let mut summary = FlushSummary::default();
        let mut writes = JoinSet::new();

        for name in dirty {
            let Some(snapshot) = self.registry.get(&name) else {
                // Deleted since it was marked; nothing to do.
                summary.skipped += 1;
                continue;
            };
            if snapshot.is_empty() {
                summary.skipped += 1;
                continue;
            }
            let store = self.store.clone();
            writes.spawn(async move {
                let result = store.write(&snapshot).await;
                (name, result)
            });
        }

        while let Some(joined) = writes.join_next().await {
            match joined {
                Ok((_, Ok(()))) => summary.written += 1,
                Ok((name, Err(e))) => {
                    log::warn!("flush of region '{}' failed, will retry: {}", name, e);
                    self.dirty.mark(&name);
                    summary.failed += 1;
                }
                Err(e) => {
                    log::error!("flush task panicked: {}", e);
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Load every snapshot file in the storage directory
    ///
    /// Failures are isolated per file; the summary reports both counts for
    /// operator visibility.
    pub async fn load_all(&self, resolver: &dyn WorldResolver) -> Result<LoadSummary> {
        let mut summary = LoadSummary::default();

        tokio::fs::create_dir_all(&self.dir).await?;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            let Some(region) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };

            match self.store.open(&region, &path, resolver).await {
                Ok(snapshot) => {
                    self.registry.insert(Arc::new(snapshot));
                    summary.loaded += 1;
                }
                Err(e) => {
                    log::warn!("skipping snapshot file {}: {}", path.display(), e);
                    summary.failed += 1;
                }
            }
        }

        log::info!(
            "startup load: {} regions loaded, {} failed",
            summary.loaded,
            summary.failed
        );
        Ok(summary)
    }
}
