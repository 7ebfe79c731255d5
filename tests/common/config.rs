//! Test configuration helpers and mock server setup

use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use podcast_dl::Config;

/// Config writing into `<temp>/audiofiles` with the given pool width
pub fn test_config(temp_dir: &TempDir, concurrency: usize) -> Config {
    let mut config = Config::default();
    config.download.download_dir = temp_dir.path().join("audiofiles");
    config.download.max_concurrent_downloads = concurrency;
    config
}

/// Serve `body` at `url_path`
pub async fn mount_media(server: &MockServer, url_path: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

/// Serve `body` at `url_path` after a delay
pub async fn mount_slow_media(server: &MockServer, url_path: &str, body: &[u8], delay: Duration) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body.to_vec())
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

/// Answer `url_path` with a bare status code
pub async fn mount_status(server: &MockServer, url_path: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Serve every URL used by [`all_played_export`](super::all_played_export)
pub async fn mount_all_played(server: &MockServer) {
    mount_media(server, "/files/1.mp3", b"first episode audio").await;
    mount_media(server, "/files/show/1.mp3", b"my show audio").await;
    mount_media(server, "/files/leap.m4a", b"leap day audio").await;
    mount_media(server, "/feeds/example.xml", b"<rss><channel/></rss>").await;
    mount_media(server, "/feeds/second.xml", b"<rss><channel/></rss>").await;
}
