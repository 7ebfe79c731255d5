//! Per-episode work: deciding what to do, then doing it.
//!
//! Preparation runs in export order, one episode at a time, so path claims
//! are deterministic. It settles everything that needs no network: known
//! identities, duplicates within the run, files already on disk and file name
//! collisions. Only episodes that really need a transfer become an
//! [`EpisodeJob`] for the worker pool.

use chrono::{Local, Utc};
use tracing::{debug, error, info, warn};

use super::PodcastDownloader;
use crate::dedup::Claim;
use crate::error::{Result, StorageError};
use crate::fetch::fetch_to_path;
use crate::identity::identify;
use crate::metadata::{EpisodeMetadata, SnapshotOutcome, read_sidecar, write_sidecar};
use crate::resolver::{ResolvedPaths, resolve};
use crate::types::{Episode, EpisodeId, Event, FetchOutcome, SkipReason};

/// An episode that needs a transfer, with its claimed paths
pub(crate) struct EpisodeJob {
    pub(crate) episode: Episode,
    pub(crate) id: EpisodeId,
    pub(crate) paths: ResolvedPaths,
}

/// Result of preparing one episode
pub(crate) enum Prepared {
    /// Nothing left to transfer
    Done(FetchOutcome),
    /// Hand to the worker pool
    Fetch(EpisodeJob),
}

impl PodcastDownloader {
    /// Handle a single episode end to end
    ///
    /// The transfer still waits for a free slot in the shared pool, so this is
    /// safe to call while a run is in progress.
    pub async fn process_episode(&self, episode: Episode) -> FetchOutcome {
        match self.prepare(&episode).await {
            Prepared::Done(outcome) => outcome,
            Prepared::Fetch(job) => {
                let id = job.id.clone();
                let downloader = self.clone();
                let handle = self
                    .pool
                    .submit(async move { downloader.execute(job).await })
                    .await;
                self.join_outcome(&episode, &id, handle.await).await
            }
        }
    }

    /// Decide whether and where an episode should be fetched
    pub(crate) async fn prepare(&self, episode: &Episode) -> Prepared {
        let (id, source) = identify(episode);

        if self.store.is_known(&id).await {
            return self.skipped(episode, SkipReason::AlreadyRecorded);
        }
        if !self.store.reserve(&id).await {
            return self.skipped(episode, SkipReason::DuplicateInRun);
        }

        debug!(
            podcast = %episode.podcast.title,
            episode = %episode.title,
            identity = %id.short(),
            ?source,
            "Preparing episode"
        );

        match self.place(episode, &id).await {
            Ok(Placement::Claimed(paths)) => Prepared::Fetch(EpisodeJob {
                episode: episode.clone(),
                id,
                paths,
            }),
            Ok(Placement::Backfilled) => self.skipped(episode, SkipReason::Backfilled),
            Err(e) => {
                self.store.release(&id).await;
                Prepared::Done(self.failed(episode, e.to_string()))
            }
        }
    }

    /// Find the first file name this identity may use
    async fn place(&self, episode: &Episode, id: &EpisodeId) -> Result<Placement> {
        let base = resolve(
            self.config.download_dir(),
            episode,
            &self.config.download.default_extension,
        );

        for candidate in base.candidates(episode, id) {
            if let Some(owner) = self.store.rival_claimant(&candidate.media_path, id).await {
                debug!(
                    path = %candidate.media_path.display(),
                    owner = %owner.short(),
                    "File name taken by another episode"
                );
                continue;
            }

            // the sidecar name is shared by media files that differ only in extension
            let sidecar = read_sidecar(&candidate.metadata_path).await;
            if let Some(existing) = &sidecar
                && !existing.describes(episode, id)
            {
                debug!(
                    path = %candidate.metadata_path.display(),
                    "Sidecar on disk belongs to another episode"
                );
                continue;
            }

            if tokio::fs::try_exists(&candidate.media_path)
                .await
                .unwrap_or(false)
            {
                if sidecar.is_none() {
                    self.write_missing_sidecar(episode, id, &candidate).await;
                }
                self.store.backfill(id, &candidate.media_path).await?;
                return Ok(Placement::Backfilled);
            }

            match self.store.claim(&candidate.media_path, id).await {
                Claim::Granted | Claim::AlreadyOwned => {
                    if candidate != base {
                        info!(
                            episode = %episode.title,
                            path = %candidate.media_path.display(),
                            "Disambiguated file name"
                        );
                    }
                    return Ok(Placement::Claimed(candidate));
                }
                Claim::Conflict(_) => continue,
            }
        }

        Err(StorageError::NoFreeName {
            path: base.media_path,
        }
        .into())
    }

    async fn write_missing_sidecar(&self, episode: &Episode, id: &EpisodeId, paths: &ResolvedPaths) {
        let metadata = EpisodeMetadata::new(episode, id, &paths.media_path, Utc::now());
        if let Err(e) = write_sidecar(&paths.metadata_path, &metadata).await {
            warn!(path = %paths.metadata_path.display(), error = %e, "Failed to write sidecar for existing file");
        }
    }

    /// Transfer, describe and record one episode
    ///
    /// Steps run strictly in order; the history append comes last and is the
    /// point at which the episode counts as done.
    pub(crate) async fn execute(&self, job: EpisodeJob) -> FetchOutcome {
        let EpisodeJob { episode, id, paths } = job;

        self.emit_event(Event::EpisodeStarted {
            podcast: episode.podcast.title.clone(),
            title: episode.title.clone(),
        });

        match self.transfer(&episode, &id, &paths).await {
            Ok(bytes) => {
                info!(
                    podcast = %episode.podcast.title,
                    episode = %episode.title,
                    path = %paths.media_path.display(),
                    bytes,
                    "Episode downloaded"
                );
                self.emit_event(Event::EpisodeDownloaded {
                    podcast: episode.podcast.title.clone(),
                    title: episode.title.clone(),
                    path: paths.media_path.clone(),
                    bytes,
                });
                self.snapshot_feed(&episode, &paths).await;
                FetchOutcome::Downloaded {
                    path: paths.media_path,
                    bytes,
                }
            }
            Err(e) => {
                self.store.release(&id).await;
                self.failed(&episode, e.to_string())
            }
        }
    }

    async fn transfer(&self, episode: &Episode, id: &EpisodeId, paths: &ResolvedPaths) -> Result<u64> {
        tokio::fs::create_dir_all(&paths.podcast_dir)
            .await
            .map_err(|e| StorageError::CreateDir {
                path: paths.podcast_dir.clone(),
                reason: e.to_string(),
            })?;

        let bytes = fetch_to_path(self.source.as_ref(), &episode.media_url, &paths.media_path).await?;

        let completed_at = Utc::now();
        let metadata = EpisodeMetadata::new(episode, id, &paths.media_path, completed_at);
        write_sidecar(&paths.metadata_path, &metadata).await?;

        self.store.record(id, &paths.media_path, completed_at).await?;
        Ok(bytes)
    }

    async fn snapshot_feed(&self, episode: &Episode, paths: &ResolvedPaths) {
        if !self.config.download.snapshot_feeds {
            return;
        }
        let today = Local::now().date_naive();
        match self
            .snapshots
            .ensure(self.source.as_ref(), &episode.podcast, &paths.podcast_dir, today)
            .await
        {
            Ok(SnapshotOutcome::Saved(path)) => {
                info!(podcast = %episode.podcast.title, path = %path.display(), "Saved feed snapshot");
                self.emit_event(Event::FeedSnapshotSaved {
                    podcast: episode.podcast.title.clone(),
                    path,
                });
            }
            Ok(_) => {}
            Err(e) => {
                warn!(podcast = %episode.podcast.title, error = %e, "Failed to save feed snapshot");
            }
        }
    }

    /// Turn a finished pool task into an outcome
    pub(crate) async fn join_outcome(
        &self,
        episode: &Episode,
        id: &EpisodeId,
        joined: std::result::Result<FetchOutcome, tokio::task::JoinError>,
    ) -> FetchOutcome {
        match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                self.store.release(id).await;
                self.failed(episode, format!("download task aborted: {}", e))
            }
        }
    }

    fn skipped(&self, episode: &Episode, reason: SkipReason) -> Prepared {
        debug!(
            podcast = %episode.podcast.title,
            episode = %episode.title,
            %reason,
            "Skipping episode"
        );
        self.emit_event(Event::EpisodeSkipped {
            podcast: episode.podcast.title.clone(),
            title: episode.title.clone(),
            reason,
        });
        Prepared::Done(FetchOutcome::Skipped { reason })
    }

    fn failed(&self, episode: &Episode, reason: String) -> FetchOutcome {
        error!(
            podcast = %episode.podcast.title,
            episode = %episode.title,
            url = %episode.media_url,
            error = %reason,
            "Episode failed"
        );
        self.emit_event(Event::EpisodeFailed {
            podcast: episode.podcast.title.clone(),
            title: episode.title.clone(),
            error: reason.clone(),
        });
        FetchOutcome::Failed { reason }
    }
}

enum Placement {
    Claimed(ResolvedPaths),
    Backfilled,
}
