//! Episode sidecars and feed snapshots
//!
//! Each downloaded episode gets a pretty-printed JSON sidecar next to its media
//! file describing where it came from. Sidecars are written once and never
//! updated. Podcasts can also keep a daily copy of their feed XML as
//! `feed.YYYY-MM-DD.xml` in the podcast directory.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, StorageError};
use crate::fetch::{MediaSource, discard, fetch_to_path, temp_path_for};
use crate::types::{Episode, EpisodeId, PodcastFeed};

/// Podcast section of a sidecar
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodcastInfo {
    /// Podcast title
    pub title: String,
    /// Outline display text
    #[serde(default)]
    pub text: Option<String>,
    /// Feed URL
    #[serde(default)]
    pub xml_url: Option<String>,
}

/// Episode section of a sidecar
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeInfo {
    /// Episode title
    pub title: String,
    /// Publish date as written in the export
    #[serde(default)]
    pub published_date: Option<String>,
    /// Episode web page
    #[serde(default)]
    pub url: Option<String>,
    /// Provider id (e.g. `overcastId`)
    #[serde(default)]
    pub provider_id: Option<String>,
    /// Provider page
    #[serde(default)]
    pub provider_url: Option<String>,
    /// Media URL the file was downloaded from
    pub enclosure_url: String,
}

/// Contents of an episode sidecar
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    /// Owning podcast
    pub podcast: PodcastInfo,
    /// The episode
    pub episode: EpisodeInfo,
    /// Media file name, relative to the podcast directory
    pub filename: String,
    /// Episode identity (absent in sidecars from older tools)
    #[serde(default)]
    pub identity: Option<EpisodeId>,
    /// When the media file was committed
    #[serde(default)]
    pub downloaded_at: Option<DateTime<Utc>>,
}

impl EpisodeMetadata {
    /// Describe an episode stored at `media_path`
    pub fn new(
        episode: &Episode,
        id: &EpisodeId,
        media_path: &Path,
        downloaded_at: DateTime<Utc>,
    ) -> Self {
        let podcast = &episode.podcast;
        Self {
            podcast: PodcastInfo {
                title: podcast.title.clone(),
                text: podcast.text.clone(),
                xml_url: podcast.feed_url.clone(),
            },
            episode: EpisodeInfo {
                title: episode.title.clone(),
                published_date: episode.published_raw.clone(),
                url: episode.page_url.clone(),
                provider_id: episode.external_id.clone(),
                provider_url: episode.provider_url.clone(),
                enclosure_url: episode.media_url.clone(),
            },
            filename: media_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            identity: Some(id.clone()),
            downloaded_at: Some(downloaded_at),
        }
    }

    /// Whether this sidecar was written for the given episode
    ///
    /// Sidecars without an identity are matched on their enclosure URL.
    pub fn describes(&self, episode: &Episode, id: &EpisodeId) -> bool {
        match &self.identity {
            Some(identity) => identity == id,
            None => self.episode.enclosure_url.trim() == episode.media_url.trim(),
        }
    }
}

/// Write a sidecar unless one already exists
///
/// The JSON goes to a temporary file that is renamed into place, so readers
/// never see a half-written sidecar. Returns `Ok(false)` when the sidecar was
/// already there.
pub async fn write_sidecar(path: &Path, metadata: &EpisodeMetadata) -> Result<bool> {
    let sidecar_error = |reason: String| StorageError::Sidecar {
        path: path.to_path_buf(),
        reason,
    };

    if tokio::fs::try_exists(path)
        .await
        .map_err(|e| sidecar_error(e.to_string()))?
    {
        debug!(path = %path.display(), "Sidecar already present");
        return Ok(false);
    }

    let json = serde_json::to_string_pretty(metadata)?;
    let tmp = temp_path_for(path);

    if let Err(e) = tokio::fs::write(&tmp, json.as_bytes()).await {
        discard(&tmp).await;
        return Err(sidecar_error(e.to_string()).into());
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        discard(&tmp).await;
        return Err(sidecar_error(e.to_string()).into());
    }
    Ok(true)
}

/// Read a sidecar if one exists and parses
pub async fn read_sidecar(path: &Path) -> Option<EpisodeMetadata> {
    let bytes = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable sidecar");
            None
        }
    }
}

/// What happened when a feed snapshot was requested
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// The feed was downloaded to this path
    Saved(PathBuf),
    /// Today's snapshot already exists on disk
    AlreadyPresent(PathBuf),
    /// This run already handled the podcast today
    AlreadyAttempted,
    /// The podcast has no feed URL
    NoFeedUrl,
}

/// Once-per-day feed XML snapshots
#[derive(Default)]
pub struct FeedSnapshots {
    attempted: Mutex<HashSet<PathBuf>>,
}

impl FeedSnapshots {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of a podcast's snapshot for `date`
    pub fn snapshot_path(podcast_dir: &Path, date: NaiveDate) -> PathBuf {
        podcast_dir.join(format!("feed.{}.xml", date.format("%Y-%m-%d")))
    }

    /// Save today's feed snapshot for a podcast unless it already exists
    ///
    /// Only the first request per podcast and day in a run does any work;
    /// concurrent episodes of the same podcast do not race for the file.
    pub async fn ensure(
        &self,
        source: &dyn MediaSource,
        podcast: &PodcastFeed,
        podcast_dir: &Path,
        today: NaiveDate,
    ) -> Result<SnapshotOutcome> {
        let Some(feed_url) = podcast.feed_url.as_deref() else {
            return Ok(SnapshotOutcome::NoFeedUrl);
        };

        let path = Self::snapshot_path(podcast_dir, today);
        if !self.attempted.lock().await.insert(path.clone()) {
            return Ok(SnapshotOutcome::AlreadyAttempted);
        }

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(SnapshotOutcome::AlreadyPresent(path));
        }

        fetch_to_path(source, feed_url, &path).await?;
        Ok(SnapshotOutcome::Saved(path))
    }
}
