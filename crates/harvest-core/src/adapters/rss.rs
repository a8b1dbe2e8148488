//! RSS/Atom feed adapter
//!
//! A feed is one page: every entry is returned in a single `fetch_page`
//! call. The primary efficiency mechanism is the conditional re-fetch: the
//! stored revision marker (ETag / Last-Modified from the previous fetch) is
//! sent as `If-None-Match`/`If-Modified-Since`, and a 304 answer ends the
//! source without transferring content.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvest_common::types::{Page, RawRecord};
use harvest_common::FetchError;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::{AdapterSettings, Fetcher, SourceAdapter};

/// Opaque feed revision marker persisted between fetches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedMarker {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl FeedMarker {
    pub fn decode(raw: Option<&str>) -> Self {
        raw.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default()
    }

    pub fn encode(&self) -> Option<String> {
        if self.etag.is_none() && self.last_modified.is_none() {
            return None;
        }
        serde_json::to_string(self).ok()
    }
}

pub struct RssAdapter {
    url: Url,
    fetcher: Arc<Fetcher>,
    settings: AdapterSettings,
}

impl RssAdapter {
    pub fn new(url: Url, fetcher: Arc<Fetcher>, settings: AdapterSettings) -> Self {
        Self {
            url,
            fetcher,
            settings,
        }
    }
}

#[async_trait]
impl SourceAdapter for RssAdapter {
    async fn fetch_page(&self, _cursor: Option<&str>) -> Result<Page, FetchError> {
        let marker = FeedMarker::decode(self.settings.feed_revision.as_deref());

        let mut headers = self.settings.auth_headers();
        if let Some(ref etag) = marker.etag {
            headers.push(("If-None-Match", etag.clone()));
        }
        if let Some(ref lm) = marker.last_modified {
            headers.push(("If-Modified-Since", lm.clone()));
        }

        let response = self.fetcher.get(&self.url, &headers).await?;
        if response.not_modified() {
            debug!(url = %self.url, "Feed not modified since last fetch");
            return Ok(Page::end());
        }

        let records = parse_feed(&response.body)?;
        let new_marker = FeedMarker {
            etag: response.etag,
            last_modified: response.last_modified,
        };

        Ok(Page {
            records,
            next_cursor: None,
            revision: new_marker.encode(),
        })
    }

    async fn estimate_total(&self) -> Result<Option<i64>, FetchError> {
        // Counting entries would cost a full transfer; feeds are small and
        // self-terminating anyway.
        Ok(None)
    }
}

#[derive(Default)]
struct EntryBuilder {
    guid: Option<String>,
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    content: Option<String>,
    author: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    categories: Vec<String>,
}

impl EntryBuilder {
    fn build(self) -> RawRecord {
        let identifier = self.guid.clone().or_else(|| self.link.clone());
        let revision = self.updated.clone().or_else(|| self.published.clone());
        let published_at = self
            .published
            .as_deref()
            .or(self.updated.as_deref())
            .and_then(parse_feed_date);

        let payload = json!({
            "guid": self.guid,
            "title": self.title.unwrap_or_default(),
            "link": self.link.unwrap_or_default(),
            "description": self.description.unwrap_or_default(),
            "content": self.content.unwrap_or_default(),
            "author": self.author.unwrap_or_default(),
            "published": self.published,
            "updated": self.updated,
            "categories": self.categories,
        });

        RawRecord {
            identifier,
            payload,
            revision,
            published_at,
        }
    }
}

/// Feeds carry RFC 2822 dates (RSS `pubDate`) or RFC 3339 (Atom).
fn parse_feed_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Extract entries from an RSS 2.0 or Atom document.
fn parse_feed(xml: &str) -> Result<Vec<RawRecord>, FetchError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut entry: Option<EntryBuilder> = None;
    let mut field: Option<Vec<u8>> = None;
    let mut buffer = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"item" | b"entry" => entry = Some(EntryBuilder::default()),
                    b"link" if entry.is_some() => {
                        // Atom puts the target in an href attribute.
                        let href = e.attributes().flatten().find_map(|a| {
                            (a.key.as_ref() == b"href")
                                .then(|| a.unescape_value().ok().map(|v| v.into_owned()))
                                .flatten()
                        });
                        if let (Some(entry), Some(href)) = (entry.as_mut(), href) {
                            entry.link = Some(href);
                        }
                        field = Some(local);
                        buffer.clear();
                    }
                    _ if entry.is_some() => {
                        field = Some(local);
                        buffer.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"link" {
                    let href = e.attributes().flatten().find_map(|a| {
                        (a.key.as_ref() == b"href")
                            .then(|| a.unescape_value().ok().map(|v| v.into_owned()))
                            .flatten()
                    });
                    if let (Some(entry), Some(href)) = (entry.as_mut(), href) {
                        entry.link = Some(href);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if field.is_some() {
                    buffer.push_str(&t.unescape().unwrap_or_default());
                }
            }
            Ok(Event::CData(t)) => {
                if field.is_some() {
                    buffer.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Ok(Event::End(e)) => {
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"item" | b"entry" => {
                        if let Some(done) = entry.take() {
                            records.push(done.build());
                        }
                    }
                    _ => {
                        if let Some(ref mut builder) = entry {
                            if field.as_deref() == Some(local.as_slice()) {
                                assign_field(builder, &local, buffer.trim());
                            }
                        }
                        field = None;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(FetchError::Malformed(format!("invalid feed XML: {}", e))),
        }
    }

    Ok(records)
}

fn assign_field(entry: &mut EntryBuilder, local: &[u8], text: &str) {
    if text.is_empty() {
        return;
    }
    match local {
        b"guid" | b"id" => entry.guid = Some(text.to_string()),
        b"title" => entry.title = Some(text.to_string()),
        // RSS carries the link as element text; Atom's href was captured at
        // the start tag.
        b"link" if entry.link.is_none() => entry.link = Some(text.to_string()),
        b"description" | b"summary" => entry.description = Some(text.to_string()),
        b"content" | b"encoded" => entry.content = Some(text.to_string()),
        b"author" | b"creator" => entry.author = Some(text.to_string()),
        b"pubDate" | b"published" => entry.published = Some(text.to_string()),
        b"updated" => entry.updated = Some(text.to_string()),
        b"category" => entry.categories.push(text.to_string()),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_FEED: &str = r#"<?xml version="1.0"?>
        <rss version="2.0">
        <channel>
            <title>Registry updates</title>
            <item>
                <guid>urn:doc:101</guid>
                <title>Decree 101</title>
                <link>https://gov.example/doc/101</link>
                <description>New decree</description>
                <pubDate>Mon, 04 May 2026 10:00:00 GMT</pubDate>
                <category>law</category>
            </item>
            <item>
                <guid>urn:doc:100</guid>
                <title>Decree 100</title>
                <link>https://gov.example/doc/100</link>
                <description><![CDATA[Older <b>decree</b>]]></description>
                <pubDate>Sun, 03 May 2026 09:00:00 GMT</pubDate>
            </item>
        </channel>
        </rss>"#;

    const ATOM_FEED: &str = r#"<?xml version="1.0"?>
        <feed xmlns="http://www.w3.org/2005/Atom">
            <title>Registry</title>
            <entry>
                <id>urn:doc:7</id>
                <title>Notice 7</title>
                <link href="https://gov.example/notice/7"/>
                <summary>Short</summary>
                <updated>2026-05-04T12:00:00Z</updated>
            </entry>
        </feed>"#;

    #[test]
    fn test_parse_rss_entries() {
        let records = parse_feed(RSS_FEED).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].identifier.as_deref(), Some("urn:doc:101"));
        assert_eq!(records[0].payload["title"], "Decree 101");
        assert_eq!(records[0].payload["categories"][0], "law");
        assert!(records[0].published_at.is_some());
        assert!(records[0].published_at > records[1].published_at);
    }

    #[test]
    fn test_parse_rss_cdata_description() {
        let records = parse_feed(RSS_FEED).unwrap();
        assert_eq!(records[1].payload["description"], "Older <b>decree</b>");
    }

    #[test]
    fn test_parse_atom_entries() {
        let records = parse_feed(ATOM_FEED).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identifier.as_deref(), Some("urn:doc:7"));
        assert_eq!(records[0].payload["link"], "https://gov.example/notice/7");
        assert_eq!(records[0].revision.as_deref(), Some("2026-05-04T12:00:00Z"));
    }

    #[test]
    fn test_truncated_feed_is_malformed() {
        let result = parse_feed("<rss><channel><item><guid>1</guid>");
        // quick-xml reports the dangling tags at EOF.
        assert!(result.is_err() || result.unwrap().is_empty());
    }

    #[test]
    fn test_marker_round_trip() {
        let marker = FeedMarker {
            etag: Some("\"abc\"".to_string()),
            last_modified: None,
        };
        let encoded = marker.encode().unwrap();
        let decoded = FeedMarker::decode(Some(&encoded));
        assert_eq!(decoded.etag.as_deref(), Some("\"abc\""));
        assert!(FeedMarker::default().encode().is_none());
    }
}
