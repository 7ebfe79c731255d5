//! Custom test assertions for E2E tests

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::Receiver;

use podcast_dl::Event;

/// Every file under `root` with its contents, keyed by relative path
pub fn tree_snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            let contents = std::fs::read(e.path()).unwrap();
            (rel, contents)
        })
        .collect()
}

/// Relative paths of every file under `root`
pub fn tree_paths(root: &Path) -> Vec<PathBuf> {
    tree_snapshot(root).into_keys().collect()
}

/// Assert no hidden temporary files are left anywhere under `root`
pub fn assert_no_temp_files(root: &Path) {
    let leftovers: Vec<_> = tree_paths(root)
        .into_iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".part"))
        })
        .collect();
    assert!(leftovers.is_empty(), "temporary files left: {leftovers:?}");
}

/// Drain every event already buffered on a receiver
pub fn drain_events(events: &mut Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Highest number of episodes between `EpisodeStarted` and their terminal event
pub fn peak_concurrent_transfers(events: &[Event]) -> usize {
    let mut running: usize = 0;
    let mut peak = 0;
    for event in events {
        match event {
            Event::EpisodeStarted { .. } => {
                running += 1;
                peak = peak.max(running);
            }
            Event::EpisodeDownloaded { .. } | Event::EpisodeFailed { .. } => {
                running = running.saturating_sub(1);
            }
            _ => {}
        }
    }
    peak
}
