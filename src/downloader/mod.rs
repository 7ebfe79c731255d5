//! Download orchestration, split into focused submodules.
//!
//! The `PodcastDownloader` struct and its methods are organized by stage:
//! - [`episode_task`] - Per-episode preparation (dedup, path claims, backfill)
//!   and execution (transfer, sidecar, history)
//! - [`run`] - Whole-export runs and the summary

mod episode_task;
mod run;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::dedup::DedupStore;
use crate::error::{Result, StorageError};
use crate::fetch::{HttpMediaSource, MediaSource};
use crate::metadata::FeedSnapshots;
use crate::pool::WorkerPool;
use crate::types::Event;

/// Downloads played episodes from an export into a local tree
/// (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct PodcastDownloader {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Download history and in-run claims, the only shared mutable state
    pub(crate) store: Arc<DedupStore>,
    /// Network seam (HTTP in production, doubles in tests)
    pub(crate) source: Arc<dyn MediaSource>,
    /// Daily feed snapshot tracker
    pub(crate) snapshots: Arc<FeedSnapshots>,
    /// Bounded pool that runs transfers (respects max_concurrent_downloads)
    pub(crate) pool: WorkerPool,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
}

impl PodcastDownloader {
    /// Create a downloader that fetches over HTTP
    ///
    /// This validates the configuration, creates the download directory and
    /// loads the download history. Failing any of these is fatal.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let source = Arc::new(HttpMediaSource::new(&config.http)?);
        Self::with_source(config, source).await
    }

    /// Create a downloader with a custom [`MediaSource`]
    pub async fn with_source(config: Config, source: Arc<dyn MediaSource>) -> Result<Self> {
        config.validate()?;

        let root = config.download_dir().clone();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::CreateDir {
                path: root.clone(),
                reason: e.to_string(),
            })?;

        let store = DedupStore::open(config.history_path(), root).await?;

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = broadcast::channel(1000);

        let pool = WorkerPool::new(config.download.max_concurrent_downloads);

        tracing::debug!(
            download_dir = %config.download_dir().display(),
            history = %store.path().display(),
            concurrency = pool.width(),
            "Downloader initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
            source,
            snapshots: Arc::new(FeedSnapshots::new()),
            pool,
            event_tx,
        })
    }

    /// Subscribe to download events
    ///
    /// Each subscriber receives all events independently. A subscriber that
    /// falls more than 1000 events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Download history backing this downloader
    pub fn store(&self) -> &DedupStore {
        &self.store
    }

    /// Highest number of transfers that ran at once
    pub fn peak_concurrency(&self) -> usize {
        self.pool.peak_in_flight()
    }

    /// Emit an event to all subscribers
    ///
    /// With no subscribers the event is dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
