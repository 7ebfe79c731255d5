//! Whole-export runs

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::PodcastDownloader;
use super::episode_task::Prepared;
use crate::error::Result;
use crate::opml::Export;
use crate::types::{
    Episode, EpisodeId, EpisodeReport, Event, FetchOutcome, PodcastSelection, RunSummary,
};

/// An episode's place in the run: settled already, or waiting on the pool
enum Slot<'a> {
    Settled(&'a Episode, FetchOutcome),
    Pending(&'a Episode, EpisodeId, JoinHandle<FetchOutcome>),
}

impl PodcastDownloader {
    /// Download every played episode of the selected podcasts
    ///
    /// Episodes are prepared in export order and handed to the worker pool as
    /// slots free up. Per-episode failures end up in the summary; this only
    /// returns `Err` for problems that make the whole run meaningless.
    pub async fn run(&self, export: &Export, selection: &PodcastSelection) -> Result<RunSummary> {
        let podcasts = export.select(selection);
        let total: usize = podcasts.iter().map(|p| p.episodes.len()).sum();

        info!(
            podcasts = podcasts.len(),
            episodes = total,
            concurrency = self.pool.width(),
            download_dir = %self.config.download_dir().display(),
            "Starting run"
        );
        self.emit_event(Event::RunStarted { episodes: total });

        let mut slots = Vec::with_capacity(total);
        for podcast in &podcasts {
            debug!(
                podcast = %podcast.feed.title,
                episodes = podcast.episodes.len(),
                "Queueing podcast"
            );
            for episode in &podcast.episodes {
                let slot = match self.prepare(episode).await {
                    Prepared::Done(outcome) => Slot::Settled(episode, outcome),
                    Prepared::Fetch(job) => {
                        let id = job.id.clone();
                        let downloader = self.clone();
                        let handle = self
                            .pool
                            .submit(async move { downloader.execute(job).await })
                            .await;
                        Slot::Pending(episode, id, handle)
                    }
                };
                slots.push(slot);
            }
        }

        let mut summary = RunSummary::default();
        for slot in slots {
            let (episode, outcome) = match slot {
                Slot::Settled(episode, outcome) => (episode, outcome),
                Slot::Pending(episode, id, handle) => {
                    let outcome = self.join_outcome(episode, &id, handle.await).await;
                    (episode, outcome)
                }
            };
            summary.push(EpisodeReport {
                podcast: episode.podcast.title.clone(),
                title: episode.title.clone(),
                outcome,
            });
        }

        info!(
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            failed = summary.failed,
            "Run complete"
        );
        self.emit_event(Event::RunComplete {
            downloaded: summary.downloaded,
            skipped: summary.skipped,
            failed: summary.failed,
        });

        Ok(summary)
    }
}
