//! Media transfer
//!
//! [`MediaSource`] is the network seam: it streams one URL into a writer.
//! [`fetch_to_path`] wraps a source with the commit protocol. The body goes to
//! a hidden temporary file next to the destination, which is renamed into
//! place only after the whole transfer succeeded. A failed or interrupted
//! transfer never leaves anything at the final path.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::{FetchError, Result, StorageError};

/// Something that can stream the body of a URL
///
/// The production implementation is [`HttpMediaSource`]; tests substitute
/// doubles that fail mid-stream or record concurrency.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Stream the body at `url` into `sink`, returning the number of bytes written
    ///
    /// Implementations must check the response status before writing anything.
    async fn fetch(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> std::result::Result<u64, FetchError>;
}

/// [`MediaSource`] backed by a shared reqwest client
#[derive(Clone)]
pub struct HttpMediaSource {
    client: reqwest::Client,
}

impl HttpMediaSource {
    /// Build a client from HTTP settings
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout());
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl MediaSource for HttpMediaSource {
    async fn fetch(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> std::result::Result<u64, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let expected = response.content_length();
        copy_body(url, expected, response.bytes_stream(), sink).await
    }
}

/// Write a body stream into `sink`, checking it against the advertised length
///
/// A body shorter (or longer) than `expected` is [`FetchError::Truncated`].
pub(crate) async fn copy_body<S, B, E>(
    url: &str,
    expected: Option<u64>,
    stream: S,
    sink: &mut (dyn AsyncWrite + Send + Unpin),
) -> std::result::Result<u64, FetchError>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let write = |e: std::io::Error| FetchError::Write {
        reason: e.to_string(),
    };

    futures::pin_mut!(stream);
    let mut received: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let chunk = chunk.as_ref();
        sink.write_all(chunk).await.map_err(write)?;
        received += chunk.len() as u64;
    }
    sink.flush().await.map_err(write)?;

    if let Some(expected) = expected
        && received != expected
    {
        return Err(FetchError::Truncated { expected, received });
    }

    Ok(received)
}

/// Temporary file used while `dest` is being written
///
/// Lives in the same directory so the final rename never crosses filesystems.
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.part", name))
}

/// Download `url` to `dest` atomically
///
/// The destination directory must already exist. A temporary file left over
/// by an interrupted run is truncated and reused.
pub async fn fetch_to_path(source: &dyn MediaSource, url: &str, dest: &Path) -> Result<u64> {
    let tmp = temp_path_for(dest);
    debug!(url = %url, dest = %dest.display(), "Fetching");

    let bytes = match write_temp(source, url, &tmp).await {
        Ok(bytes) => bytes,
        Err(e) => {
            discard(&tmp).await;
            return Err(e);
        }
    };

    if let Err(e) = tokio::fs::rename(&tmp, dest).await {
        discard(&tmp).await;
        return Err(StorageError::Rename {
            from: tmp,
            to: dest.to_path_buf(),
            reason: e.to_string(),
        }
        .into());
    }

    Ok(bytes)
}

async fn write_temp(source: &dyn MediaSource, url: &str, tmp: &Path) -> Result<u64> {
    let write = |e: std::io::Error| FetchError::Write {
        reason: format!("{}: {}", tmp.display(), e),
    };

    let mut file = tokio::fs::File::create(tmp).await.map_err(write)?;
    let bytes = source.fetch(url, &mut file).await?;
    file.flush().await.map_err(write)?;
    file.sync_all().await.map_err(write)?;
    Ok(bytes)
}

/// Remove a temporary file, logging anything but its absence
pub(crate) async fn discard(tmp: &Path) {
    match tokio::fs::remove_file(tmp).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %tmp.display(), error = %e, "Failed to remove temporary file"),
    }
}
