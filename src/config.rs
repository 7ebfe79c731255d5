//! Configuration types for podcast-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Where and how episodes are stored
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Download directory (default: "./audiofiles")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum concurrent episode downloads (default: 5)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Extension used when the media URL has none (default: "mp3")
    #[serde(default = "default_extension")]
    pub default_extension: String,

    /// Save a copy of each podcast's feed XML once per day (default: true)
    #[serde(default = "default_true")]
    pub snapshot_feeds: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            default_extension: default_extension(),
            snapshot_feeds: true,
        }
    }
}

/// HTTP client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent sent with every request (default: "Mozilla/5.0")
    ///
    /// Some podcast hosts reject the default client agents of HTTP libraries.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Connection timeout in seconds (default: 30)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout in seconds (default: none, episodes can be large)
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: None,
        }
    }
}

impl HttpConfig {
    /// Connection timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Whole-request timeout, if any
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// Durable state kept between runs
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Download history log (default: `<download_dir>/download_history.jsonl`)
    #[serde(default)]
    pub history_path: Option<PathBuf>,
}

/// Main configuration for [`PodcastDownloader`](crate::PodcastDownloader)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage and concurrency settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Durable history settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Resolved location of the download history log
    pub fn history_path(&self) -> PathBuf {
        self.persistence
            .history_path
            .clone()
            .unwrap_or_else(|| self.download.download_dir.join(HISTORY_FILE_NAME))
    }

    /// Reject settings the downloader cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::config(
                "max_concurrent_downloads",
                "at least one concurrent download is required",
            ));
        }
        let ext = self.download.default_extension.trim_start_matches('.');
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::config(
                "default_extension",
                format!(
                    "'{}' is not a usable file extension",
                    self.download.default_extension
                ),
            ));
        }
        if self.http.user_agent.trim().is_empty() {
            return Err(Error::config("user_agent", "user agent must not be empty"));
        }
        Ok(())
    }
}

/// File name of the history log inside the download directory
pub const HISTORY_FILE_NAME: &str = "download_history.jsonl";

fn default_download_dir() -> PathBuf {
    PathBuf::from("audiofiles")
}

fn default_max_concurrent() -> usize {
    5
}

fn default_extension() -> String {
    "mp3".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}
