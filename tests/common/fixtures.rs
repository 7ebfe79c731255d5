//! OPML export fixtures
//!
//! Media and feed URLs point at a wiremock server, so every fixture takes the
//! server's base URI.

use std::path::{Path, PathBuf};

/// Export without played flags: every listed episode counts as played
pub fn all_played_export(base: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<opml version="1.0">
    <head><title>Overcast Podcast Subscriptions</title></head>
    <body>
        <outline text="playlists">
            <outline type="podcast-playlist" title="All Episodes" smart="1"/>
        </outline>
        <outline text="feeds">
            <outline type="rss" title="My Example Podcast" text="Example" xmlUrl="{base}/feeds/example.xml">
                <outline type="podcast-episode" overcastId="12345"
                         pubDate="2001-01-01T01:01:01-00:00" title="The first episode"
                         url="https://example.net/podcast/1" overcastUrl="https://overcast.fm/+ABCDE"
                         enclosureUrl="{base}/files/1.mp3"/>
                <outline type="podcast-episode" overcastId="12346"
                         title="Episode 1: My Show"
                         enclosureUrl="{base}/files/show/1.mp3"/>
            </outline>
            <outline type="rss" title="Second/Show" xmlUrl="{base}/feeds/second.xml">
                <outline type="podcast-episode" overcastId="22222"
                         pubDate="2020-02-29T23:30:00+02:00" title="Leap day"
                         enclosureUrl="{base}/files/leap.m4a?tracking=1"/>
                <outline type="podcast-episode" title="Nothing to fetch"/>
            </outline>
        </outline>
    </body>
</opml>"#
    )
}

/// Export with played flags: only `played="1"` episodes are kept
pub fn played_flag_export(base: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<opml version="1.0">
    <body>
        <outline text="feeds">
            <outline type="rss" title="Flagged Show" xmlUrl="{base}/feeds/flagged.xml">
                <outline type="podcast-episode" title="Heard it" played="1"
                         pubDate="2022-05-01T08:00:00-07:00" enclosureUrl="{base}/files/heard.mp3"/>
                <outline type="podcast-episode" title="Half way" played="0"
                         enclosureUrl="{base}/files/half.mp3"/>
                <outline type="podcast-episode" title="Never opened"
                         enclosureUrl="{base}/files/never.mp3"/>
            </outline>
        </outline>
    </body>
</opml>"#
    )
}

/// Export with `count` episodes of one podcast, each at `/files/bulk/<n>.mp3`
pub fn bulk_export(base: &str, count: usize) -> String {
    let episodes: String = (0..count)
        .map(|n| {
            format!(
                r#"<outline type="podcast-episode" title="Episode {n}" enclosureUrl="{base}/files/bulk/{n}.mp3"/>"#
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"<opml version="1.0"><body>
<outline type="rss" title="Bulk">
{episodes}
</outline>
</body></opml>"#
    )
}

/// Write an export into `dir` and return its path
pub fn write_export(dir: &Path, xml: &str) -> PathBuf {
    let path = dir.join("overcast.opml");
    std::fs::write(&path, xml).unwrap();
    path
}
