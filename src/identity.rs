//! Episode identity hashing
//!
//! An episode's identity is the SHA-256 of its media URL. Exports sometimes
//! carry enclosure values that are not URLs at all; those episodes are
//! identified by podcast and episode title instead.

use sha2::{Digest, Sha256};

use crate::resolver::sanitize;
use crate::types::{Episode, EpisodeId};

/// What an identity was computed from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentitySource {
    /// The media URL
    MediaUrl,
    /// Sanitized podcast and episode titles
    Title,
}

impl EpisodeId {
    /// Identity of an episode
    pub fn for_episode(episode: &Episode) -> Self {
        identify(episode).0
    }

    /// Identity of a bare media URL
    pub fn from_url(media_url: &str) -> Self {
        digest(media_url.trim().as_bytes())
    }
}

/// Compute an episode's identity and report what it was derived from
pub fn identify(episode: &Episode) -> (EpisodeId, IdentitySource) {
    let url = episode.media_url.trim();
    if url::Url::parse(url).is_ok() {
        return (EpisodeId::from_url(url), IdentitySource::MediaUrl);
    }

    let key = format!(
        "{}\n{}",
        sanitize(&episode.podcast.title),
        sanitize(&episode.title)
    );
    (digest(key.as_bytes()), IdentitySource::Title)
}

fn digest(bytes: &[u8]) -> EpisodeId {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    EpisodeId(format!("{:x}", hasher.finalize()))
}

/// Whether a string looks like an identity (64 lowercase hex characters)
pub fn is_identity_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
