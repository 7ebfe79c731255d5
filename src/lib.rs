//! # podcast-dl
//!
//! Archive the podcast episodes you have listened to.
//!
//! podcast-dl reads an OPML listening-history export (as produced by Overcast
//! and similar players), picks out the played episodes and downloads their
//! audio into a local tree, one directory per podcast, with a JSON sidecar per
//! episode. Runs are idempotent: a download history records what is already
//! done, files found on disk are adopted instead of fetched again, and a file
//! only appears at its final path once it was transferred completely.
//!
//! ## Quick Start
//!
//! ```no_run
//! use podcast_dl::{Config, PodcastDownloader, PodcastSelection, opml};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let export = opml::read_export(Path::new("overcast.opml")).await?;
//!
//!     let downloader = PodcastDownloader::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = downloader.run(&export, &PodcastSelection::All).await?;
//!     println!("{} downloaded, {} failed", summary.downloaded, summary.failed);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Download history and in-run deduplication
pub mod dedup;
/// Download orchestration (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Media transfer with atomic commit
pub mod fetch;
/// Episode identity hashing
pub mod identity;
/// Episode sidecars and feed snapshots
pub mod metadata;
/// OPML export parsing
pub mod opml;
/// Bounded worker pool
pub mod pool;
/// File name and path resolution
pub mod resolver;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use downloader::PodcastDownloader;
pub use error::{Error, FetchError, ParseError, Result, StorageError};
pub use opml::{Export, ExportVariant};
pub use types::{
    Episode, EpisodeId, Event, FetchOutcome, PodcastFeed, PodcastSelection, RunSummary,
    SkipReason,
};

/// Resolve once the process receives Ctrl+C (or SIGTERM on Unix)
///
/// Downloads are not cancelled mid-flight; a caller racing a run against this
/// signal simply stops waiting. Whatever was interrupted leaves at most a
/// hidden temporary file, which the next run reuses.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
