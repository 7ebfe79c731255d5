use super::test_helpers::*;
use super::*;
use crate::types::{FetchOutcome, PodcastSelection, SkipReason};
use std::path::{Path, PathBuf};
use std::time::Duration;


/// Media files (not sidecars, snapshots or history) under a tree, sorted
fn media_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "mp3"))
        .collect();
    files.sort();
    files
}

fn skip_reasons(summary: &crate::types::RunSummary) -> Vec<Option<SkipReason>> {
    summary
        .reports
        .iter()
        .map(|r| match r.outcome {
            FetchOutcome::Skipped { reason } => Some(reason),
            _ => None,
        })
        .collect()
}
