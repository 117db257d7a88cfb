//! Paged stock directory: one row per listed company, linking to its
//! price history.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, Span};

use super::normalize::{base_url, dedup_links, element_text, resolve_href};
use super::{freshness, DocumentParser, ParseContext};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::models::Listing;

static ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table.stock-list tr").expect("static selector"));
static CODE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td.code").expect("static selector"));
static CODE_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td.code a[href]").expect("static selector"));
static NAME: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td.name").expect("static selector"));
static MARKET: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td.market").expect("static selector"));

pub struct StockListPage<'a> {
    envelope: &'a Envelope,
    span: Span,
    listings: Vec<Listing>,
    links: Vec<String>,
}

impl<'a> StockListPage<'a> {
    pub fn new(envelope: &'a Envelope, span: Span) -> Result<Self> {
        let text = envelope.text()?;
        let base = base_url(envelope)?;
        let document = Html::parse_document(&text);

        let mut listings = Vec::new();
        let mut links = Vec::new();
        for row in document.select(&ROW) {
            let Some(code) = row.select(&CODE).next() else {
                continue;
            };
            listings.push(parse_row(&envelope.url, code, row)?);

            if let Some(href) = row.select(&CODE_LINK).next().and_then(|a| a.value().attr("href")) {
                links.extend(resolve_href(&base, href));
            }
        }
        let links = dedup_links(links);

        debug!(
            parent: &span,
            url = %envelope.url,
            rows = listings.len(),
            links = links.len(),
            "Extracted stock list"
        );
        Ok(Self {
            envelope,
            span,
            listings,
            links,
        })
    }

    pub fn listings(&self) -> &[Listing] {
        &self.listings
    }
}

fn parse_row(url: &str, code: ElementRef<'_>, row: ElementRef<'_>) -> Result<Listing> {
    let cell = |sel: &Selector| row.select(sel).next().map(element_text).unwrap_or_default();

    let symbol = element_text(code);
    if symbol.is_empty() {
        return Err(Error::invalid(url, "listing row without a code"));
    }
    let name = cell(&*NAME);
    if name.is_empty() {
        return Err(Error::invalid(url, format!("listing {symbol} without a name")));
    }

    Ok(Listing {
        symbol,
        name,
        market: cell(&*MARKET),
    })
}

#[async_trait]
impl<'a> DocumentParser for StockListPage<'a> {
    fn redownload(&self, now: DateTime<Utc>) -> bool {
        freshness::index_page(now, self.envelope.fetched_at)
    }

    fn is_valid(&self) -> bool {
        !self.listings.is_empty()
    }

    fn related_links(&self) -> Option<Vec<String>> {
        self.is_valid().then(|| self.links.clone())
    }

    async fn parse(&self, ctx: &mut ParseContext) -> Result<()> {
        if !self.is_valid() {
            debug!(parent: &self.span, url = %self.envelope.url, "No listings, nothing to persist");
            return Ok(());
        }

        let ids = ctx.store().upsert_all(self.listings.clone()).await?;
        info!(parent: &self.span, url = %self.envelope.url, rows = ids.len(), "Upserted listings");
        Ok(())
    }
}

pub fn factory<'a>(envelope: &'a Envelope, span: Span) -> Result<Box<dyn DocumentParser + 'a>> {
    Ok(Box::new(StockListPage::new(envelope, span)?))
}
