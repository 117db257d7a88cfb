//! Archive index pages that only enumerate one link per year.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, Span};

use super::normalize::{base_url, dedup_links, resolve_href};
use super::{freshness, DocumentParser, ParseContext};
use crate::envelope::Envelope;
use crate::error::Result;

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));

/// A 19xx/20xx year not glued to other digits.
static YEAR_IN_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)(?:19|20)\d{2}(?:\D|$)").expect("static regex"));

/// A page of per-year archive links. Always valid, always stale, writes
/// nothing; its whole purpose is discovery.
pub struct YearLinkPage<'a> {
    envelope: &'a Envelope,
    span: Span,
    links: Vec<String>,
}

impl<'a> YearLinkPage<'a> {
    pub fn new(envelope: &'a Envelope, span: Span) -> Result<Self> {
        let text = envelope.text()?;
        let base = base_url(envelope)?;
        let document = Html::parse_document(&text);

        let links = document
            .select(&ANCHOR)
            .filter_map(|a| a.value().attr("href"))
            .filter(|href| YEAR_IN_HREF.is_match(href))
            .filter_map(|href| resolve_href(&base, href))
            .collect();
        let links = dedup_links(links);

        debug!(parent: &span, url = %envelope.url, links = links.len(), "Extracted year links");
        Ok(Self { envelope, span, links })
    }
}

#[async_trait]
impl<'a> DocumentParser for YearLinkPage<'a> {
    fn redownload(&self, _now: DateTime<Utc>) -> bool {
        freshness::link_page()
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn related_links(&self) -> Option<Vec<String>> {
        Some(self.links.clone())
    }

    async fn parse(&self, _ctx: &mut ParseContext) -> Result<()> {
        debug!(parent: &self.span, url = %self.envelope.url, "Link page has nothing to persist");
        Ok(())
    }
}

pub fn factory<'a>(envelope: &'a Envelope, span: Span) -> Result<Box<dyn DocumentParser + 'a>> {
    Ok(Box::new(YearLinkPage::new(envelope, span)?))
}
