//! Core types: podcasts, episodes, outcomes and events

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::Error;

/// Stable fingerprint of an episode (lowercase hex SHA-256)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeId(pub String);

impl EpisodeId {
    /// Get the inner hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight hex characters, used as a last-resort filename suffix
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A subscribed podcast, as listed in the export
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodcastFeed {
    /// Podcast title (names the output subdirectory after sanitization)
    pub title: String,
    /// Alternate display text from the outline, when present
    pub text: Option<String>,
    /// URL of the podcast's RSS feed
    pub feed_url: Option<String>,
}

/// A played episode that should exist on disk
#[derive(Clone, Debug, PartialEq)]
pub struct Episode {
    /// Owning podcast
    pub podcast: Arc<PodcastFeed>,
    /// Episode title
    pub title: String,
    /// Publication timestamp, if the export carried a parseable one
    pub published: Option<DateTime<FixedOffset>>,
    /// Publication date exactly as written in the export
    pub published_raw: Option<String>,
    /// Audio enclosure URL
    pub media_url: String,
    /// Episode web page
    pub page_url: Option<String>,
    /// Provider-assigned id (e.g. `overcastId`)
    pub external_id: Option<String>,
    /// Provider page for the episode (e.g. `overcastUrl`)
    pub provider_url: Option<String>,
}

/// Why an episode needed no transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The history log already lists this identity
    AlreadyRecorded,
    /// The media file was already on disk; a backfill entry was written
    Backfilled,
    /// The same identity appeared earlier in this run
    DuplicateInRun,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::AlreadyRecorded => "already downloaded",
            SkipReason::Backfilled => "found on disk",
            SkipReason::DuplicateInRun => "duplicate in export",
        };
        f.write_str(s)
    }
}

/// Terminal result of processing one episode
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// Media written to its final path and recorded in the history
    Downloaded {
        /// Final media path
        path: PathBuf,
        /// Bytes written
        bytes: u64,
    },
    /// Nothing to do
    Skipped {
        /// Why the episode was skipped
        reason: SkipReason,
    },
    /// The attempt failed; a later run will try again
    Failed {
        /// Rendered error
        reason: String,
    },
}

impl FetchOutcome {
    /// Whether this outcome is a failure
    pub fn is_failed(&self) -> bool {
        matches!(self, FetchOutcome::Failed { .. })
    }
}

/// Outcome of one episode, labelled for the summary
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpisodeReport {
    /// Podcast title
    pub podcast: String,
    /// Episode title
    pub title: String,
    /// What happened
    pub outcome: FetchOutcome,
}

/// Aggregated results of a run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Episodes transferred
    pub downloaded: usize,
    /// Episodes that needed no transfer
    pub skipped: usize,
    /// Episodes that failed
    pub failed: usize,
    /// Per-episode outcomes in export order
    pub reports: Vec<EpisodeReport>,
}

impl RunSummary {
    /// Add one episode's outcome to the totals
    pub fn push(&mut self, report: EpisodeReport) {
        match report.outcome {
            FetchOutcome::Downloaded { .. } => self.downloaded += 1,
            FetchOutcome::Skipped { .. } => self.skipped += 1,
            FetchOutcome::Failed { .. } => self.failed += 1,
        }
        self.reports.push(report);
    }

    /// Whether any episode failed
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Total episodes processed
    pub fn total(&self) -> usize {
        self.downloaded + self.skipped + self.failed
    }

    /// Failed episodes with their reasons
    pub fn failures(&self) -> impl Iterator<Item = (&EpisodeReport, &str)> {
        self.reports.iter().filter_map(|r| match &r.outcome {
            FetchOutcome::Failed { reason } => Some((r, reason.as_str())),
            _ => None,
        })
    }
}

/// Which podcasts of the export to process
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PodcastSelection {
    /// Every podcast in the export
    #[default]
    All,
    /// 1-based positions as listed by the export
    Indices(Vec<usize>),
    /// Exact podcast titles
    Titles(Vec<String>),
}

impl FromStr for PodcastSelection {
    type Err = Error;

    /// Parse a comma-separated list of 1-based numbers, or `all`
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() || input.eq_ignore_ascii_case("all") {
            return Ok(PodcastSelection::All);
        }

        let mut indices = Vec::new();
        for part in input.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let n: usize = part.parse().map_err(|_| {
                Error::config(
                    "podcast",
                    format!("'{}' is not a podcast number; enter numbers separated by commas", part),
                )
            })?;
            if n == 0 {
                return Err(Error::config("podcast", "podcast numbers start at 1"));
            }
            indices.push(n);
        }
        Ok(PodcastSelection::Indices(indices))
    }
}

/// Event emitted while a run progresses
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run was admitted with this many episodes
    RunStarted {
        /// Episodes to process
        episodes: usize,
    },

    /// An episode needed no transfer
    EpisodeSkipped {
        /// Podcast title
        podcast: String,
        /// Episode title
        title: String,
        /// Why it was skipped
        reason: SkipReason,
    },

    /// An episode transfer started
    EpisodeStarted {
        /// Podcast title
        podcast: String,
        /// Episode title
        title: String,
    },

    /// An episode was written and recorded
    EpisodeDownloaded {
        /// Podcast title
        podcast: String,
        /// Episode title
        title: String,
        /// Final media path
        path: PathBuf,
        /// Bytes written
        bytes: u64,
    },

    /// An episode failed
    EpisodeFailed {
        /// Podcast title
        podcast: String,
        /// Episode title
        title: String,
        /// Error message
        error: String,
    },

    /// A feed snapshot was saved
    FeedSnapshotSaved {
        /// Podcast title
        podcast: String,
        /// Snapshot path
        path: PathBuf,
    },

    /// All episodes reached a terminal outcome
    RunComplete {
        /// Episodes transferred
        downloaded: usize,
        /// Episodes skipped
        skipped: usize,
        /// Episodes failed
        failed: usize,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_parses_comma_separated_numbers() {
        let sel: PodcastSelection = "1, 3,4".parse().unwrap();
        assert_eq!(sel, PodcastSelection::Indices(vec![1, 3, 4]));
    }

    #[test]
    fn selection_all_and_blank_mean_everything() {
        assert_eq!("all".parse::<PodcastSelection>().unwrap(), PodcastSelection::All);
        assert_eq!("  ".parse::<PodcastSelection>().unwrap(), PodcastSelection::All);
    }

    #[test]
    fn selection_rejects_words_and_zero() {
        assert!("1, two".parse::<PodcastSelection>().is_err());
        assert!("0".parse::<PodcastSelection>().is_err());
    }

    #[test]
    fn summary_counts_each_outcome() {
        let mut summary = RunSummary::default();
        let report = |outcome| EpisodeReport {
            podcast: "Show".to_string(),
            title: "Ep".to_string(),
            outcome,
        };
        summary.push(report(FetchOutcome::Downloaded {
            path: PathBuf::from("a.mp3"),
            bytes: 3,
        }));
        summary.push(report(FetchOutcome::Skipped {
            reason: SkipReason::AlreadyRecorded,
        }));
        summary.push(report(FetchOutcome::Failed {
            reason: "HTTP 500".to_string(),
        }));

        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total(), 3);
        assert!(summary.has_failures());
        let failures: Vec<_> = summary.failures().map(|(_, reason)| reason).collect();
        assert_eq!(failures, vec!["HTTP 500"]);
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = Event::EpisodeSkipped {
            podcast: "Show".to_string(),
            title: "Ep".to_string(),
            reason: SkipReason::Backfilled,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "episode_skipped");
        assert_eq!(json["reason"], "backfilled");
    }

    #[test]
    fn short_id_is_a_prefix() {
        let id = EpisodeId("0123456789abcdef".to_string());
        assert_eq!(id.short(), "01234567");
        assert_eq!(EpisodeId("abc".to_string()).short(), "abc");
    }
}
