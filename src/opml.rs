//! OPML listening-history export parsing.
//!
//! Exports have the following shape (attributes abbreviated):
//!
//! ```xml
//! <opml version="1.0">
//!   <body>
//!     <outline text="playlists">...</outline>
//!     <outline text="feeds">
//!       <outline type="rss" title="My Example Podcast" xmlUrl="https://example.org/podcast.xml">
//!         <outline type="podcast-episode" overcastId="12345"
//!                  pubDate="2001-01-01T01:01:01-00:00" title="The first episode"
//!                  url="https://example.net/podcast/1" overcastUrl="https://overcast.fm/+ABCDE"
//!                  enclosureUrl="https://example.net/files/1.mp3" played="1"/>
//!       </outline>
//!     </outline>
//!   </body>
//! </opml>
//! ```
//!
//! Two variants exist in the wild. In one, every episode outline is an episode
//! the user played. In the other, episodes carry a `played` attribute and only
//! those marked played are kept. The variant is decided per document: if any
//! episode outline has a `played` attribute, the flag gates inclusion for all.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, ParseError, Result};
use crate::types::{Episode, PodcastFeed, PodcastSelection};

/// How the export marks played episodes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportVariant {
    /// No played attribute anywhere; every listed episode counts as played
    AllPlayed,
    /// Episodes carry `played`; only truthy values are kept
    PlayedFlag,
}

/// Counters gathered while parsing, for diagnostics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExportStats {
    /// Feed outlines found
    pub feeds: usize,
    /// Episodes kept
    pub episodes: usize,
    /// Episodes dropped because they were not played
    pub unplayed: usize,
    /// Episodes dropped because they had no enclosure URL
    pub missing_url: usize,
}

/// A podcast and its played episodes
#[derive(Clone, Debug)]
pub struct PodcastEntry {
    /// The podcast
    pub feed: Arc<PodcastFeed>,
    /// Played episodes in export order
    pub episodes: Vec<Episode>,
}

/// A parsed export
#[derive(Clone, Debug)]
pub struct Export {
    /// Which schema variant the document uses
    pub variant: ExportVariant,
    /// Podcasts in export order (including those with nothing to download)
    pub podcasts: Vec<PodcastEntry>,
    /// Parse counters
    pub stats: ExportStats,
}

impl Export {
    /// Every played episode, grouped by podcast in export order
    pub fn episodes(&self) -> impl Iterator<Item = &Episode> {
        self.podcasts.iter().flat_map(|p| p.episodes.iter())
    }

    /// Podcast titles in listing order
    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.podcasts.iter().map(|p| p.feed.title.as_str())
    }

    /// Resolve a selection against this export
    ///
    /// Unknown numbers or titles are reported and skipped; repeated entries
    /// are only returned once.
    pub fn select(&self, selection: &PodcastSelection) -> Vec<&PodcastEntry> {
        match selection {
            PodcastSelection::All => self.podcasts.iter().collect(),
            PodcastSelection::Indices(indices) => {
                let mut picked: Vec<&PodcastEntry> = Vec::new();
                for &n in indices {
                    match n.checked_sub(1).and_then(|i| self.podcasts.get(i)) {
                        Some(entry) if !picked.iter().any(|p| Arc::ptr_eq(&p.feed, &entry.feed)) => {
                            picked.push(entry)
                        }
                        Some(_) => {}
                        None => warn!(number = n, "No podcast found with this number"),
                    }
                }
                picked
            }
            PodcastSelection::Titles(titles) => {
                let mut picked: Vec<&PodcastEntry> = Vec::new();
                for title in titles {
                    let mut found = false;
                    for entry in self.podcasts.iter().filter(|p| &p.feed.title == title) {
                        found = true;
                        if !picked.iter().any(|p| Arc::ptr_eq(&p.feed, &entry.feed)) {
                            picked.push(entry);
                        }
                    }
                    if !found {
                        warn!(title = %title, "No podcast found with this title");
                    }
                }
                picked
            }
        }
    }
}

/// Read and parse an export file
///
/// A missing or unreadable file is an [`Error::Input`]; malformed XML is an
/// [`Error::Parse`].
pub async fn read_export(path: &Path) -> Result<Export> {
    let bytes = tokio::fs::read(path).await.map_err(|source| Error::Input {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_export(&bytes)?)
}

type Attributes = HashMap<String, String>;

struct RawFeed {
    attrs: Attributes,
    episodes: Vec<Attributes>,
}

enum Frame {
    Feed(usize),
    Other,
}

/// Parse an export document
///
/// The whole document is checked before anything is returned, so a truncated
/// or malformed file never yields a partial list.
pub fn parse_export(xml: &[u8]) -> std::result::Result<Export, ParseError> {
    let mut reader = Reader::from_reader(xml);
    let mut stack: Vec<Frame> = Vec::new();
    let mut seen_root = false;
    let mut feeds: Vec<RawFeed> = Vec::new();

    loop {
        let position = reader.buffer_position() as u64;
        let event = reader
            .read_event()
            .map_err(|e| ParseError::at(e.to_string(), reader.buffer_position() as u64))?;

        match event {
            Event::Start(e) => {
                let frame = open_element(&e, &stack, &mut seen_root, &mut feeds, position)?;
                stack.push(frame);
            }
            Event::Empty(e) => {
                open_element(&e, &stack, &mut seen_root, &mut feeds, position)?;
            }
            Event::End(_) => {
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ParseError::at(
            format!(
                "unexpected end of document with {} unclosed element(s)",
                stack.len()
            ),
            xml.len() as u64,
        ));
    }
    if !seen_root {
        return Err(ParseError {
            message: "document has no <opml> root element".to_string(),
            position: None,
        });
    }

    Ok(build_export(feeds))
}

fn open_element(
    element: &BytesStart<'_>,
    stack: &[Frame],
    seen_root: &mut bool,
    feeds: &mut Vec<RawFeed>,
    position: u64,
) -> std::result::Result<Frame, ParseError> {
    let name = element.local_name();
    let name = name.as_ref();

    if stack.is_empty() {
        if *seen_root {
            return Err(ParseError::at(
                "document has more than one root element",
                position,
            ));
        }
        if !name.eq_ignore_ascii_case(b"opml") {
            return Err(ParseError::at(
                format!(
                    "expected <opml> root element, found <{}>",
                    String::from_utf8_lossy(name)
                ),
                position,
            ));
        }
        *seen_root = true;
        return Ok(Frame::Other);
    }

    if !name.eq_ignore_ascii_case(b"outline") {
        return Ok(Frame::Other);
    }

    let attrs = collect_attributes(element, position)?;
    let is_feed = attrs
        .get("type")
        .is_some_and(|t| t.eq_ignore_ascii_case("rss"));

    if is_feed {
        feeds.push(RawFeed {
            attrs,
            episodes: Vec::new(),
        });
        return Ok(Frame::Feed(feeds.len() - 1));
    }

    if let Some(Frame::Feed(idx)) = stack.last()
        && let Some(feed) = feeds.get_mut(*idx)
    {
        feed.episodes.push(attrs);
    }
    Ok(Frame::Other)
}

fn collect_attributes(
    element: &BytesStart<'_>,
    position: u64,
) -> std::result::Result<Attributes, ParseError> {
    let mut attrs = HashMap::new();
    for attr in element.attributes() {
        let attr =
            attr.map_err(|e| ParseError::at(format!("malformed attribute: {}", e), position))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| ParseError::at(format!("bad attribute value for {}: {}", key, e), position))?
            .into_owned();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

fn build_export(feeds: Vec<RawFeed>) -> Export {
    let variant = if feeds
        .iter()
        .any(|f| f.episodes.iter().any(|e| e.contains_key("played")))
    {
        ExportVariant::PlayedFlag
    } else {
        ExportVariant::AllPlayed
    };

    let mut stats = ExportStats {
        feeds: feeds.len(),
        ..Default::default()
    };
    let mut podcasts = Vec::with_capacity(feeds.len());

    for raw in feeds {
        let feed = Arc::new(podcast_from_attrs(&raw.attrs));
        let mut episodes = Vec::new();

        for attrs in &raw.episodes {
            let played = match variant {
                ExportVariant::AllPlayed => true,
                ExportVariant::PlayedFlag => attrs.get("played").is_some_and(|v| is_truthy(v)),
            };
            if !played {
                stats.unplayed += 1;
                continue;
            }
            match episode_from_attrs(&feed, attrs) {
                Some(episode) => episodes.push(episode),
                None => stats.missing_url += 1,
            }
        }

        stats.episodes += episodes.len();
        podcasts.push(PodcastEntry { feed, episodes });
    }

    debug!(
        feeds = stats.feeds,
        episodes = stats.episodes,
        unplayed = stats.unplayed,
        missing_url = stats.missing_url,
        ?variant,
        "Parsed export"
    );

    Export {
        variant,
        podcasts,
        stats,
    }
}

fn podcast_from_attrs(attrs: &Attributes) -> PodcastFeed {
    let text = non_empty(attrs.get("text"));
    let title = non_empty(attrs.get("title"))
        .or_else(|| text.clone())
        .unwrap_or_else(|| {
            warn!("Podcast outline has no title, using a placeholder");
            "Untitled podcast".to_string()
        });

    PodcastFeed {
        title,
        text,
        feed_url: non_empty(attrs.get("xmlUrl")),
    }
}

fn episode_from_attrs(podcast: &Arc<PodcastFeed>, attrs: &Attributes) -> Option<Episode> {
    let named_title = non_empty(attrs.get("title")).or_else(|| non_empty(attrs.get("text")));

    let Some(media_url) = non_empty(attrs.get("enclosureUrl")) else {
        warn!(
            podcast = %podcast.title,
            episode = named_title.as_deref().unwrap_or("<untitled>"),
            "No enclosure URL for episode, skipping"
        );
        return None;
    };

    let title = named_title.unwrap_or_else(|| {
        let fallback = title_from_url(&media_url).unwrap_or_else(|| "Untitled episode".to_string());
        warn!(
            podcast = %podcast.title,
            url = %media_url,
            title = %fallback,
            "Episode has no title, deriving one"
        );
        fallback
    });

    let published_raw = non_empty(attrs.get("pubDate"));
    let published = published_raw.as_deref().and_then(|raw| {
        let parsed = parse_pub_date(raw);
        if parsed.is_none() {
            warn!(podcast = %podcast.title, episode = %title, pub_date = raw, "Unparseable publish date");
        }
        parsed
    });

    Some(Episode {
        podcast: Arc::clone(podcast),
        title,
        published,
        published_raw,
        media_url,
        page_url: non_empty(attrs.get("url")),
        external_id: non_empty(attrs.get("overcastId")),
        provider_url: non_empty(attrs.get("overcastUrl")),
    })
}

/// Parse an export publish date
///
/// Accepts RFC 3339 (the usual form, e.g. `2001-01-01T01:01:01-00:00`),
/// RFC 2822, and a bare leading `YYYY-MM-DD`.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt);
    }
    let date = NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()?;
    let utc = FixedOffset::east_opt(0)?;
    utc.from_local_datetime(&date.and_hms_opt(0, 0, 0)?).single()
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn title_from_url(media_url: &str) -> Option<String> {
    let url = url::Url::parse(media_url).ok()?;
    let segment = url.path_segments()?.next_back()?;
    let stem = Path::new(segment).file_stem()?.to_str()?;
    (!stem.is_empty()).then(|| stem.to_string())
}
