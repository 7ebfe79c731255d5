//! Filename and path resolution
//!
//! Every episode maps to `<root>/<podcast>/<YYYY-MM-DD title>.<ext>` plus a JSON
//! sidecar next to it. Resolution is pure: no filesystem access happens here,
//! collision handling is left to the caller through [`ResolvedPaths::candidates`].

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::types::{Episode, EpisodeId};

/// Replacement for characters that cannot appear in a file name
pub const PLACEHOLDER: char = '-';

/// Name used when sanitization leaves nothing
const EMPTY_NAME: &str = "untitled";

/// Longest URL extension that is still treated as one
const MAX_EXTENSION_LEN: usize = 8;

/// Make a title safe to use as a single path component
///
/// Path separators, colons, wildcards, quotes, angle brackets, pipes and
/// control characters become [`PLACEHOLDER`]. Leading dots are removed so the
/// result is never hidden or a relative path; trailing dots and spaces are
/// removed for Windows-style filesystems.
///
/// ```
/// use podcast_dl::resolver::sanitize;
///
/// assert_eq!(sanitize("Episode 1: My Show"), "Episode 1- My Show");
/// assert_eq!(sanitize("../etc"), "-etc");
/// ```
pub fn sanitize(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => PLACEHOLDER,
            c if c.is_control() => PLACEHOLDER,
            c => c,
        })
        .collect();

    let trimmed = replaced
        .trim()
        .trim_start_matches('.')
        .trim_end_matches(['.', ' '])
        .trim();

    if trimmed.is_empty() {
        EMPTY_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// File extension of a media URL's last path segment
///
/// Query strings and fragments are ignored. Extensions that are empty, longer
/// than eight characters or not alphanumeric fall back to `default`.
pub fn media_extension(media_url: &str, default: &str) -> String {
    let default = default.trim_start_matches('.').to_ascii_lowercase();

    let Ok(url) = url::Url::parse(media_url) else {
        return default;
    };
    let Some(segment) = url.path_segments().and_then(|mut s| s.next_back()) else {
        return default;
    };

    match Path::new(segment).extension().and_then(|e| e.to_str()) {
        Some(ext)
            if !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext.to_ascii_lowercase()
        }
        _ => default,
    }
}

/// Sidecar location for a media file
///
/// The media extension is replaced by `json`, so `Trailer.mp3` and
/// `Trailer.m4a` share `Trailer.json`. Callers that hand out media paths must
/// treat the sidecar as part of the same name. A `.json` media file keeps its
/// extension and gains another one.
pub fn sidecar_path(media_path: &Path) -> PathBuf {
    let is_json = media_path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        let mut name = media_path.as_os_str().to_os_string();
        name.push(".json");
        PathBuf::from(name)
    } else {
        media_path.with_extension("json")
    }
}

/// Output locations for one episode
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPaths {
    /// Podcast subdirectory
    pub podcast_dir: PathBuf,
    /// File name without extension (date prefix and sanitized title)
    pub base_name: String,
    /// Media extension, without the dot
    pub extension: String,
    /// Final media path
    pub media_path: PathBuf,
    /// Final sidecar path
    pub metadata_path: PathBuf,
}

impl ResolvedPaths {
    fn build(podcast_dir: PathBuf, base_name: String, extension: String) -> Self {
        let media_path = podcast_dir.join(format!("{}.{}", base_name, extension));
        let metadata_path = sidecar_path(&media_path);
        Self {
            podcast_dir,
            base_name,
            extension,
            media_path,
            metadata_path,
        }
    }

    /// Same location with `_suffix` appended to the file name
    pub fn disambiguated(&self, suffix: &str) -> Self {
        Self::build(
            self.podcast_dir.clone(),
            format!("{}_{}", self.base_name, sanitize(suffix)),
            self.extension.clone(),
        )
    }

    /// Names to try in order when an earlier one belongs to another episode
    ///
    /// The plain name comes first, then the name suffixed with the provider id
    /// (when the export has one), then the name suffixed with the short
    /// identity hash, which is unique per identity.
    pub fn candidates(&self, episode: &Episode, id: &EpisodeId) -> Vec<ResolvedPaths> {
        let mut out = vec![self.clone()];
        if let Some(external) = episode.external_id.as_deref()
            && !external.trim().is_empty()
        {
            out.push(self.disambiguated(external));
        }
        out.push(self.disambiguated(id.short()));
        out
    }
}

/// Resolve where an episode and its sidecar are stored under `root`
pub fn resolve(root: &Path, episode: &Episode, default_extension: &str) -> ResolvedPaths {
    let podcast_dir = root.join(sanitize(&episode.podcast.title));
    let title = sanitize(&episode.title);

    let base_name = match episode.published {
        Some(published) => format!("{} {}", published.date_naive().format("%Y-%m-%d"), title),
        None => {
            debug!(
                podcast = %episode.podcast.title,
                episode = %episode.title,
                "No usable publish date, file name has no date prefix"
            );
            title
        }
    };

    let extension = media_extension(&episode.media_url, default_extension);
    ResolvedPaths::build(podcast_dir, base_name, extension)
}
