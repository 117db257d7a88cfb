//! Exchange-published tables of listed companies.
//!
//! Unlike the stock directory this family does not write the store; rows
//! are collected into the context for the layer that reconciles listings
//! across markets.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, Span};

use super::normalize::element_text;
use super::{freshness, DocumentParser, ParseContext};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::models::{Listing, Record};

/// Context key every market listing table appends under.
pub const CONTEXT_KEY: &str = "market_listings";

static ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table.listed-companies tr").expect("static selector"));
static CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").expect("static selector"));

pub struct MarketListingTable<'a> {
    envelope: &'a Envelope,
    span: Span,
    listings: Vec<Listing>,
}

impl<'a> MarketListingTable<'a> {
    pub fn new(envelope: &'a Envelope, span: Span) -> Result<Self> {
        let text = envelope.text()?;
        let document = Html::parse_document(&text);

        let mut listings = Vec::new();
        for row in document.select(&ROW) {
            let cells: Vec<String> = row.select(&CELL).map(element_text).collect();
            if cells.is_empty() {
                continue;
            }
            listings.push(parse_row(&envelope.url, cells)?);
        }

        debug!(parent: &span, url = %envelope.url, rows = listings.len(), "Extracted market listings");
        Ok(Self {
            envelope,
            span,
            listings,
        })
    }

    pub fn listings(&self) -> &[Listing] {
        &self.listings
    }
}

fn parse_row(url: &str, cells: Vec<String>) -> Result<Listing> {
    let [symbol, name, market, ..] = cells.as_slice() else {
        return Err(Error::invalid(url, format!("expected 3 cells, found {}", cells.len())));
    };
    if symbol.is_empty() || name.is_empty() {
        return Err(Error::invalid(url, format!("listing row missing code or name: {cells:?}")));
    }
    Ok(Listing {
        symbol: symbol.clone(),
        name: name.clone(),
        market: market.clone(),
    })
}

#[async_trait]
impl<'a> DocumentParser for MarketListingTable<'a> {
    fn redownload(&self, now: DateTime<Utc>) -> bool {
        freshness::index_page(now, self.envelope.fetched_at)
    }

    fn is_valid(&self) -> bool {
        !self.listings.is_empty()
    }

    fn related_links(&self) -> Option<Vec<String>> {
        self.is_valid().then(Vec::new)
    }

    async fn parse(&self, ctx: &mut ParseContext) -> Result<()> {
        if !self.is_valid() {
            debug!(parent: &self.span, url = %self.envelope.url, "No listed companies, context untouched");
            return Ok(());
        }
        ctx.append(
            CONTEXT_KEY,
            self.listings.iter().cloned().map(Record::Listing).collect(),
        );
        debug!(parent: &self.span, url = %self.envelope.url, rows = self.listings.len(), "Appended market listings");
        Ok(())
    }
}

pub fn factory<'a>(envelope: &'a Envelope, span: Span) -> Result<Box<dyn DocumentParser + 'a>> {
    Ok(Box::new(MarketListingTable::new(envelope, span)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::setup_test_store;
    use chrono::TimeZone;

    fn envelope(url: &str, body: &str) -> Envelope {
        Envelope::new(url, body, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
    }

    fn table(rows: &str) -> String {
        format!(
            r#"<table class="listed-companies"><tr><th>Code</th><th>Name</th><th>Market</th></tr>{rows}</table>"#
        )
    }

    #[tokio::test]
    async fn test_tables_append_under_shared_key() {
        let (store, _dir) = setup_test_store().await;
        let prime = envelope(
            "https://example.com/markets/prime/listed",
            &table("<tr><td>7203</td><td>Toyota Motor</td><td>Prime</td></tr>"),
        );
        let growth = envelope(
            "https://example.com/markets/growth/listed",
            &table("<tr><td>4385</td><td>Mercari</td><td>Growth</td></tr>"),
        );
        let mut ctx = ParseContext::new(store.clone());

        MarketListingTable::new(&prime, Span::none()).unwrap().parse(&mut ctx).await.unwrap();
        MarketListingTable::new(&growth, Span::none()).unwrap().parse(&mut ctx).await.unwrap();

        let records = ctx.get(CONTEXT_KEY).unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(&records[1], Record::Listing(l) if l.symbol == "4385"));
        assert_eq!(store.count_listings().await.unwrap(), 0);

        assert_eq!(store.persist_context(ctx.records()).await.unwrap(), 2);
        assert_eq!(store.count_listings().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_table_leaves_context_untouched() {
        let (store, _dir) = setup_test_store().await;
        let env = envelope("https://example.com/markets/prime/listed", &table(""));
        let page = MarketListingTable::new(&env, Span::none()).unwrap();
        let mut ctx = ParseContext::new(store);

        page.parse(&mut ctx).await.unwrap();
        assert!(!page.is_valid());
        assert!(ctx.records().is_empty());
    }

    #[test]
    fn test_short_row_is_invalid_record() {
        let env = envelope(
            "https://example.com/markets/prime/listed",
            &table("<tr><td>7203</td><td>Toyota Motor</td></tr>"),
        );
        assert!(matches!(
            MarketListingTable::new(&env, Span::none()),
            Err(Error::InvalidRecord { .. })
        ));
    }
}
