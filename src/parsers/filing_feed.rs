//! Atom feeds announcing regulatory filings.
//!
//! Each `<entry>` carries one or more `<link>`s; their kind comes from the
//! `type` attribute, or the href extension when the type is missing. Links
//! are accumulated in the context under the feed's `<id>`, and archive links
//! are handed back for download.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, Span};

use super::normalize::{base_url, dedup_links, resolve_href};
use super::{freshness, DocumentParser, ParseContext};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::models::{FilingFeedLink, FilingLinkKind, Record};

pub struct FilingFeed<'a> {
    envelope: &'a Envelope,
    span: Span,
    feed_id: String,
    links: Vec<FilingFeedLink>,
}

impl<'a> FilingFeed<'a> {
    pub fn new(envelope: &'a Envelope, span: Span) -> Result<Self> {
        let url = envelope.url.as_str();
        let text = envelope.text()?;
        let base = base_url(envelope)?;

        let mut reader = Reader::from_str(&text);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut path: Vec<String> = Vec::new();
        let mut feed_id = String::new();
        let mut links = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let name = local_name(&e);
                    if is_entry_link(&path, &name) {
                        links.push(read_link(url, &base, &e)?);
                    }
                    path.push(name);
                }
                Ok(Event::Empty(e)) => {
                    if is_entry_link(&path, &local_name(&e)) {
                        links.push(read_link(url, &base, &e)?);
                    }
                }
                Ok(Event::Text(e)) => {
                    if path.len() == 2 && path[0] == "feed" && path[1] == "id" {
                        let text = e.unescape().map_err(|err| Error::malformed(url, err))?;
                        feed_id.push_str(text.trim());
                    }
                }
                Ok(Event::End(_)) => {
                    path.pop();
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(Error::malformed(
                        url,
                        format!("xml error at byte {}: {e}", reader.error_position()),
                    ));
                }
                _ => {}
            }
            buf.clear();
        }

        if !links.is_empty() && feed_id.is_empty() {
            return Err(Error::invalid(url, "feed has entries but no <id>"));
        }
        for link in &mut links {
            link.feed_id = feed_id.clone();
        }

        debug!(parent: &span, url, feed_id = %feed_id, links = links.len(), "Extracted filing feed");
        Ok(Self {
            envelope,
            span,
            feed_id,
            links,
        })
    }

    pub fn feed_id(&self) -> &str {
        &self.feed_id
    }

    pub fn links(&self) -> &[FilingFeedLink] {
        &self.links
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn is_entry_link(path: &[String], name: &str) -> bool {
    name == "link" && path.last().is_some_and(|parent| parent == "entry")
}

/// The feed id is filled in once the whole document has been read.
fn read_link(url: &str, base: &url::Url, e: &BytesStart<'_>) -> Result<FilingFeedLink> {
    let attr = |key: &str| -> Result<Option<String>> {
        match e.try_get_attribute(key) {
            Ok(Some(a)) => a
                .unescape_value()
                .map(|v| Some(v.trim().to_string()))
                .map_err(|err| Error::malformed(url, err)),
            Ok(None) => Ok(None),
            Err(err) => Err(Error::malformed(url, err)),
        }
    };

    let raw = attr("href")?
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::invalid(url, "entry link without href"))?;
    let href = resolve_href(base, &raw).unwrap_or(raw);
    let mime_type = attr("type")?;

    Ok(FilingFeedLink {
        kind: FilingLinkKind::classify(mime_type.as_deref(), &href),
        feed_id: String::new(),
        href,
    })
}

#[async_trait]
impl<'a> DocumentParser for FilingFeed<'a> {
    fn redownload(&self, now: DateTime<Utc>) -> bool {
        freshness::index_page(now, self.envelope.fetched_at)
    }

    fn is_valid(&self) -> bool {
        !self.links.is_empty()
    }

    fn related_links(&self) -> Option<Vec<String>> {
        if !self.is_valid() {
            return None;
        }
        let archives = self
            .links
            .iter()
            .filter(|l| l.kind == FilingLinkKind::Archive)
            .map(|l| l.href.clone())
            .collect();
        Some(dedup_links(archives))
    }

    async fn parse(&self, ctx: &mut ParseContext) -> Result<()> {
        if !self.is_valid() {
            debug!(parent: &self.span, url = %self.envelope.url, "Feed has no links, context untouched");
            return Ok(());
        }
        ctx.append(
            self.feed_id.clone(),
            self.links.iter().cloned().map(Record::FilingFeedLink).collect(),
        );
        debug!(
            parent: &self.span,
            url = %self.envelope.url,
            feed_id = %self.feed_id,
            links = self.links.len(),
            "Appended feed links"
        );
        Ok(())
    }
}

pub fn factory<'a>(envelope: &'a Envelope, span: Span) -> Result<Box<dyn DocumentParser + 'a>> {
    Ok(Box::new(FilingFeed::new(envelope, span)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::setup_test_store;
    use chrono::TimeZone;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <id>urn:filings:7203</id>
  <title>Filings for 7203</title>
  <entry>
    <id>urn:filings:7203:S100ABCD</id>
    <title>Annual securities report</title>
    <link href="/filings/S100ABCD.zip" type="application/zip"/>
    <link href="/filings/S100ABCD.pdf" type="application/pdf"/>
  </entry>
  <entry>
    <id>urn:filings:7203:S100EFGH</id>
    <link href="https://example.com/filings/S100EFGH.ZIP"/>
    <link href="/filings/S100EFGH/index.htm?lang=ja&amp;v=2"/>
  </entry>
</feed>"#;

    fn envelope(body: &str) -> Envelope {
        Envelope::new(
            "https://example.com/filings/feed.atom",
            body,
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_classifies_links_and_returns_archives() {
        let env = envelope(FEED);
        let feed = FilingFeed::new(&env, Span::none()).unwrap();

        assert_eq!(feed.feed_id(), "urn:filings:7203");
        let kinds: Vec<_> = feed.links().iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FilingLinkKind::Archive,
                FilingLinkKind::Pdf,
                FilingLinkKind::Archive,
                FilingLinkKind::Html
            ]
        );
        assert_eq!(
            feed.links()[3].href,
            "https://example.com/filings/S100EFGH/index.htm?lang=ja&v=2"
        );
        assert_eq!(
            feed.related_links().unwrap(),
            vec![
                "https://example.com/filings/S100ABCD.zip",
                "https://example.com/filings/S100EFGH.ZIP",
            ]
        );
    }

    #[tokio::test]
    async fn test_parse_appends_under_feed_id() {
        let (store, _dir) = setup_test_store().await;
        let env = envelope(FEED);
        let feed = FilingFeed::new(&env, Span::none()).unwrap();
        let mut ctx = ParseContext::new(store);

        feed.parse(&mut ctx).await.unwrap();
        feed.parse(&mut ctx).await.unwrap();

        assert_eq!(ctx.get("urn:filings:7203").unwrap().len(), 8);
    }

    #[test]
    fn test_feed_without_entries_is_invalid() {
        let env = envelope(r#"<feed xmlns="http://www.w3.org/2005/Atom"><id>urn:x</id></feed>"#);
        let feed = FilingFeed::new(&env, Span::none()).unwrap();
        assert!(!feed.is_valid());
        assert_eq!(feed.related_links(), None);
    }

    #[test]
    fn test_broken_xml_is_malformed() {
        let env = envelope("<feed><id>urn:x</id><entry></feed>");
        assert!(matches!(
            FilingFeed::new(&env, Span::none()),
            Err(Error::MalformedDocument { .. })
        ));
    }
}
