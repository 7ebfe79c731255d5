//! Shared test helpers for creating PodcastDownloader instances in tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::config::Config;
use crate::downloader::PodcastDownloader;
use crate::error::FetchError;
use crate::fetch::MediaSource;
use crate::opml::{Export, ExportStats, ExportVariant, PodcastEntry, parse_pub_date};
use crate::types::{Episode, PodcastFeed};

/// Canned response for one URL
#[derive(Clone)]
pub(crate) enum StubResponse {
    Body(Vec<u8>),
    Status(u16),
    /// Write these bytes, then fail as if the connection dropped
    BreakAfter(Vec<u8>),
}

/// In-memory [`MediaSource`] that records how it was used
pub(crate) struct StubSource {
    responses: HashMap<String, StubResponse>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl StubSource {
    pub(crate) fn new() -> Self {
        Self {
            responses: HashMap::new(),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn body(mut self, url: &str, body: &[u8]) -> Self {
        self.responses
            .insert(url.to_string(), StubResponse::Body(body.to_vec()));
        self
    }

    pub(crate) fn status(mut self, url: &str, status: u16) -> Self {
        self.responses
            .insert(url.to_string(), StubResponse::Status(status));
        self
    }

    pub(crate) fn broken(mut self, url: &str, partial: &[u8]) -> Self {
        self.responses
            .insert(url.to_string(), StubResponse::BreakAfter(partial.to_vec()));
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for StubSource {
    async fn fetch(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = match self.responses.get(url) {
            Some(StubResponse::Body(body)) => {
                sink.write_all(body).await.unwrap();
                Ok(body.len() as u64)
            }
            Some(StubResponse::Status(status)) => Err(FetchError::Http {
                status: *status,
                url: url.to_string(),
            }),
            Some(StubResponse::BreakAfter(partial)) => {
                sink.write_all(partial).await.unwrap();
                Err(FetchError::Network {
                    url: url.to_string(),
                    reason: "connection reset by peer".to_string(),
                })
            }
            None => Err(FetchError::Http {
                status: 404,
                url: url.to_string(),
            }),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Create a downloader over a stub source, with its download tree in a tempdir.
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) async fn create_test_downloader(
    source: Arc<StubSource>,
    concurrency: usize,
) -> (PodcastDownloader, TempDir) {
    let temp_dir = tempdir().unwrap();
    let downloader = downloader_in(&temp_dir, source, concurrency).await;
    (downloader, temp_dir)
}

/// Create another downloader over an existing tree (a "second run")
pub(crate) async fn downloader_in(
    temp_dir: &TempDir,
    source: Arc<StubSource>,
    concurrency: usize,
) -> PodcastDownloader {
    let mut config = Config::default();
    config.download.download_dir = temp_dir.path().join("audiofiles");
    config.download.max_concurrent_downloads = concurrency;
    config.download.snapshot_feeds = false;

    PodcastDownloader::with_source(config, source).await.unwrap()
}

pub(crate) fn podcast(title: &str) -> Arc<PodcastFeed> {
    Arc::new(PodcastFeed {
        title: title.to_string(),
        text: None,
        feed_url: None,
    })
}

pub(crate) fn episode(
    podcast: &Arc<PodcastFeed>,
    title: &str,
    media_url: &str,
    pub_date: Option<&str>,
) -> Episode {
    Episode {
        podcast: Arc::clone(podcast),
        title: title.to_string(),
        published: pub_date.and_then(parse_pub_date),
        published_raw: pub_date.map(str::to_string),
        media_url: media_url.to_string(),
        page_url: None,
        external_id: None,
        provider_url: None,
    }
}

pub(crate) fn export_of(podcasts: Vec<(Arc<PodcastFeed>, Vec<Episode>)>) -> Export {
    let podcasts: Vec<PodcastEntry> = podcasts
        .into_iter()
        .map(|(feed, episodes)| PodcastEntry { feed, episodes })
        .collect();
    let stats = ExportStats {
        feeds: podcasts.len(),
        episodes: podcasts.iter().map(|p| p.episodes.len()).sum(),
        ..Default::default()
    };
    Export {
        variant: ExportVariant::AllPlayed,
        podcasts,
        stats,
    }
}
