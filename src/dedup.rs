//! Download history and in-run deduplication
//!
//! The history is an append-only JSON-lines log; every line is one
//! [`DownloadRecord`]. The whole log is loaded into memory when the store
//! opens. Appends go through a single mutex so concurrent downloads never
//! interleave partial lines.
//!
//! Besides durable records the store tracks two pieces of per-run state:
//! identities currently being fetched (so the same episode listed twice is
//! only transferred once) and which identity owns each output name (so two
//! episodes whose names sanitize identically never share a media file or a
//! sidecar).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};
use crate::identity::is_identity_hex;
use crate::resolver::sidecar_path;
use crate::types::EpisodeId;

/// One line of the download history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Episode identity
    pub identity: EpisodeId,
    /// Media path, relative to the download directory when inside it
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// When the download finished (or the file was found on disk)
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// True when the file was found on disk rather than downloaded
    #[serde(default, skip_serializing_if = "is_false")]
    pub backfilled: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Result of trying to claim an output path
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Claim {
    /// The path was free and now belongs to the caller
    Granted,
    /// The caller already owned the path
    AlreadyOwned,
    /// Another identity owns the path
    Conflict(EpisodeId),
}

struct StoreState {
    records: HashMap<EpisodeId, DownloadRecord>,
    claims: HashMap<PathBuf, EpisodeId>,
    in_flight: HashSet<EpisodeId>,
    log: File,
    /// The log does not end in a newline (torn write or failed append)
    torn_tail: bool,
}

impl StoreState {
    fn owner_other_than(&self, media_path: &Path, id: &EpisodeId) -> Option<EpisodeId> {
        claimed_paths(media_path)
            .iter()
            .filter_map(|path| self.claims.get(path))
            .find(|owner| *owner != id)
            .cloned()
    }

    fn insert_claims(&mut self, media_path: &Path, id: &EpisodeId) {
        for path in claimed_paths(media_path) {
            self.claims.insert(path, id.clone());
        }
    }
}

/// A media path and its sidecar are claimed together
fn claimed_paths(media_path: &Path) -> [PathBuf; 2] {
    [media_path.to_path_buf(), sidecar_path(media_path)]
}

/// Durable record of completed downloads plus per-run bookkeeping
pub struct DedupStore {
    path: PathBuf,
    root: PathBuf,
    state: Mutex<StoreState>,
}

impl DedupStore {
    /// Open (or create) the history log at `path`
    ///
    /// `root` is the download directory; recorded paths are stored relative to
    /// it so the tree can be moved. A missing or empty log is a first run.
    /// Lines that cannot be understood are skipped with a warning.
    pub async fn open(path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let root = root.into();
        let log_error = |reason: String| StorageError::Log {
            path: path.clone(),
            reason,
        };

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(log_error(e.to_string()).into()),
        };

        let mut records = HashMap::new();
        let mut claims: HashMap<PathBuf, EpisodeId> = HashMap::new();
        for (line_no, line) in contents.lines().enumerate() {
            let Some(record) = parse_line(line) else {
                if !line.trim().is_empty() {
                    warn!(
                        path = %path.display(),
                        line = line_no + 1,
                        "Skipping unreadable download history line"
                    );
                }
                continue;
            };
            if let Some(rel) = &record.path {
                for claimed in claimed_paths(&root.join(rel)) {
                    claims.insert(claimed, record.identity.clone());
                }
            }
            records.insert(record.identity.clone(), record);
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| log_error(e.to_string()))?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| log_error(e.to_string()))?;

        let torn_tail = !contents.is_empty() && !contents.ends_with('\n');
        if torn_tail {
            warn!(path = %path.display(), "Download history ends with an incomplete line");
        }

        debug!(path = %path.display(), records = records.len(), "Opened download history");

        Ok(Self {
            path,
            root,
            state: Mutex::new(StoreState {
                records,
                claims,
                in_flight: HashSet::new(),
                log,
                torn_tail,
            }),
        })
    }

    /// Location of the history log
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the history lists this identity
    pub async fn is_known(&self, id: &EpisodeId) -> bool {
        self.state.lock().await.records.contains_key(id)
    }

    /// Number of recorded identities
    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    /// Whether nothing has been recorded yet
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The stored record for an identity
    pub async fn record_for(&self, id: &EpisodeId) -> Option<DownloadRecord> {
        self.state.lock().await.records.get(id).cloned()
    }

    /// Mark an identity as being handled by this run
    ///
    /// Returns false when it is already recorded or already reserved, in
    /// which case the caller must not fetch it.
    pub async fn reserve(&self, id: &EpisodeId) -> bool {
        let mut state = self.state.lock().await;
        if state.records.contains_key(id) {
            return false;
        }
        state.in_flight.insert(id.clone())
    }

    /// Give up a reservation after a failed attempt
    ///
    /// Paths claimed by the identity are freed too, unless it was recorded.
    pub async fn release(&self, id: &EpisodeId) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(id);
        if !state.records.contains_key(id) {
            state.claims.retain(|_, owner| owner != id);
        }
    }

    /// Claim a media path and its sidecar for an identity
    ///
    /// Both are granted or neither is.
    pub async fn claim(&self, media_path: &Path, id: &EpisodeId) -> Claim {
        let mut state = self.state.lock().await;
        if let Some(owner) = state.owner_other_than(media_path, id) {
            return Claim::Conflict(owner);
        }
        let owned = claimed_paths(media_path)
            .iter()
            .all(|path| state.claims.contains_key(path));
        if owned {
            return Claim::AlreadyOwned;
        }
        state.insert_claims(media_path, id);
        Claim::Granted
    }

    /// Another identity holding the media path or its sidecar, from history
    /// or this run
    pub async fn rival_claimant(&self, media_path: &Path, id: &EpisodeId) -> Option<EpisodeId> {
        self.state.lock().await.owner_other_than(media_path, id)
    }

    /// Append a completed download to the history
    ///
    /// This is the authoritative "done" marker. Recording an identity that is
    /// already present is a no-op and returns `Ok(false)`.
    pub async fn record(
        &self,
        id: &EpisodeId,
        media_path: &Path,
        completed_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.append(id, media_path, completed_at, false).await
    }

    /// Record a file found on disk without a history entry
    pub async fn backfill(&self, id: &EpisodeId, media_path: &Path) -> Result<bool> {
        let added = self.append(id, media_path, Utc::now(), true).await?;
        if added {
            info!(identity = %id.short(), path = %media_path.display(), "Backfilled download history");
        }
        Ok(added)
    }

    async fn append(
        &self,
        id: &EpisodeId,
        media_path: &Path,
        completed_at: DateTime<Utc>,
        backfilled: bool,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.in_flight.remove(id);
        if state.records.contains_key(id) {
            return Ok(false);
        }

        let relative = media_path
            .strip_prefix(&self.root)
            .unwrap_or(media_path)
            .to_path_buf();
        let record = DownloadRecord {
            identity: id.clone(),
            path: Some(relative),
            completed_at: Some(completed_at),
            backfilled,
        };

        let mut line = String::new();
        if state.torn_tail {
            line.push('\n');
        }
        line.push_str(&serde_json::to_string(&record)?);
        line.push('\n');

        let log_error = |e: std::io::Error| StorageError::Log {
            path: self.path.clone(),
            reason: e.to_string(),
        };
        // a partial write leaves a fragment the next append must not extend
        state.torn_tail = true;
        state
            .log
            .write_all(line.as_bytes())
            .await
            .map_err(log_error)?;
        state.log.flush().await.map_err(log_error)?;
        state.torn_tail = false;

        state.insert_claims(media_path, id);
        state.records.insert(id.clone(), record);
        Ok(true)
    }
}

fn parse_line(line: &str) -> Option<DownloadRecord> {
    let line = line.trim();
    if line.starts_with('{') {
        return serde_json::from_str(line).ok();
    }
    // older histories are bare identity hashes, one per line
    is_identity_hex(line).then(|| DownloadRecord {
        identity: EpisodeId(line.to_string()),
        path: None,
        completed_at: None,
        backfilled: false,
    })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn id(n: u32) -> EpisodeId {
        EpisodeId::from_url(&format!("https://example.net/files/{n}.mp3"))
    }

    #[tokio::test]
    async fn missing_log_is_a_first_run() {
        let dir = tempdir().unwrap();
        let store = DedupStore::open(dir.path().join("history.jsonl"), dir.path())
            .await
            .unwrap();
        assert!(store.is_empty().await);
        assert!(!store.is_known(&id(1)).await);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("history.jsonl");
        let media = dir.path().join("Show/ep.mp3");

        {
            let store = DedupStore::open(&log, dir.path()).await.unwrap();
            assert!(store.record(&id(1), &media, Utc::now()).await.unwrap());
        }

        let store = DedupStore::open(&log, dir.path()).await.unwrap();
        assert!(store.is_known(&id(1)).await);
        let record = store.record_for(&id(1)).await.unwrap();
        assert_eq!(record.path, Some(PathBuf::from("Show/ep.mp3")));
        assert!(!record.backfilled);
        assert_eq!(store.rival_claimant(&media, &id(2)).await, Some(id(1)));
        assert_eq!(store.rival_claimant(&media, &id(1)).await, None);
        let sibling = dir.path().join("Show/ep.m4a");
        assert_eq!(store.rival_claimant(&sibling, &id(2)).await, Some(id(1)));
    }

    #[tokio::test]
    async fn recording_twice_appends_once() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("history.jsonl");
        let store = DedupStore::open(&log, dir.path()).await.unwrap();
        let media = dir.path().join("a.mp3");

        assert!(store.record(&id(1), &media, Utc::now()).await.unwrap());
        assert!(!store.record(&id(1), &media, Utc::now()).await.unwrap());

        let contents = tokio::fs::read_to_string(&log).await.unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn legacy_and_garbage_lines() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("history.jsonl");
        let legacy = id(7);
        tokio::fs::write(&log, format!("{}\nnot a record\n\n{{\"broken\":\n", legacy))
            .await
            .unwrap();

        let store = DedupStore::open(&log, dir.path()).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert!(store.is_known(&legacy).await);
        assert_eq!(store.record_for(&legacy).await.unwrap().path, None);
    }

    #[tokio::test]
    async fn concurrent_records_are_all_kept() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("history.jsonl");
        let store = Arc::new(DedupStore::open(&log, dir.path()).await.unwrap());

        let mut handles = Vec::new();
        for n in 0..50 {
            let store = Arc::clone(&store);
            let media = dir.path().join(format!("{n}.mp3"));
            handles.push(tokio::spawn(async move {
                store.record(&id(n), &media, Utc::now()).await.unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        let contents = tokio::fs::read_to_string(&log).await.unwrap();
        let parsed: Vec<DownloadRecord> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed.len(), 50);

        let reopened = DedupStore::open(&log, dir.path()).await.unwrap();
        assert_eq!(reopened.len().await, 50);
    }

    #[tokio::test]
    async fn reservation_blocks_second_encounter() {
        let dir = tempdir().unwrap();
        let store = DedupStore::open(dir.path().join("h.jsonl"), dir.path())
            .await
            .unwrap();

        assert!(store.reserve(&id(1)).await);
        assert!(!store.reserve(&id(1)).await);

        store.release(&id(1)).await;
        assert!(store.reserve(&id(1)).await);

        store
            .record(&id(1), &dir.path().join("a.mp3"), Utc::now())
            .await
            .unwrap();
        assert!(!store.reserve(&id(1)).await);
    }

    #[tokio::test]
    async fn claims_detect_conflicts() {
        let dir = tempdir().unwrap();
        let store = DedupStore::open(dir.path().join("h.jsonl"), dir.path())
            .await
            .unwrap();
        let path = dir.path().join("Show/Same.mp3");

        assert_eq!(store.claim(&path, &id(1)).await, Claim::Granted);
        assert_eq!(store.claim(&path, &id(1)).await, Claim::AlreadyOwned);
        assert_eq!(store.claim(&path, &id(2)).await, Claim::Conflict(id(1)));

        store.release(&id(1)).await;
        assert_eq!(store.claim(&path, &id(2)).await, Claim::Granted);
    }

    #[tokio::test]
    async fn claims_cover_the_sidecar_name() {
        let dir = tempdir().unwrap();
        let store = DedupStore::open(dir.path().join("h.jsonl"), dir.path())
            .await
            .unwrap();
        let mp3 = dir.path().join("Show/Trailer.mp3");
        let m4a = dir.path().join("Show/Trailer.m4a");

        assert_eq!(store.claim(&mp3, &id(1)).await, Claim::Granted);
        assert_eq!(store.claim(&m4a, &id(2)).await, Claim::Conflict(id(1)));
        assert_eq!(store.rival_claimant(&m4a, &id(2)).await, Some(id(1)));
    }

    #[tokio::test]
    async fn record_after_incomplete_line_starts_a_new_line() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("history.jsonl");
        let complete = serde_json::to_string(&DownloadRecord {
            identity: id(1),
            path: Some(PathBuf::from("Show/1.mp3")),
            completed_at: None,
            backfilled: false,
        })
        .unwrap();
        tokio::fs::write(&log, format!("{complete}\n{{\"identity\":\"ab"))
            .await
            .unwrap();

        {
            let store = DedupStore::open(&log, dir.path()).await.unwrap();
            assert_eq!(store.len().await, 1);
            assert!(store
                .record(&id(2), &dir.path().join("Show/2.mp3"), Utc::now())
                .await
                .unwrap());
        }

        let reopened = DedupStore::open(&log, dir.path()).await.unwrap();
        assert!(reopened.is_known(&id(1)).await);
        assert!(reopened.is_known(&id(2)).await);
        assert_eq!(reopened.len().await, 2);
    }

    #[tokio::test]
    async fn backfill_is_flagged() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("h.jsonl");
        let store = DedupStore::open(&log, dir.path()).await.unwrap();

        assert!(store
            .backfill(&id(3), &dir.path().join("old.mp3"))
            .await
            .unwrap());

        let line = tokio::fs::read_to_string(&log).await.unwrap();
        assert!(line.contains("\"backfilled\":true"), "got: {line}");
    }
}
