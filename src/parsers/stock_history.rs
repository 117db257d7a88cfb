//! Per-stock price history pages.
//!
//! The company header yields one [`Listing`]; the price rows come from one
//! or more `table.prices` fragments whose combined order is not
//! chronological, so rows are sorted newest first after extraction.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, Span};

use super::normalize::{base_url, dedup_links, element_text, parse_iso_date, parse_price, parse_volume, resolve_href};
use super::{freshness, DocumentParser, ParseContext};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::models::{Listing, PriceBar, Record};

static CODE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".company .code").expect("static selector"));
static NAME: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".company .name").expect("static selector"));
static MARKET: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".company .market").expect("static selector"));
static PRICE_ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table.prices tr").expect("static selector"));
static CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").expect("static selector"));
static NEXT_PAGE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[rel="next"][href]"#).expect("static selector"));

/// date, open, high, low, close, volume, adjusted close
const CELLS_PER_ROW: usize = 7;

pub struct StockHistoryPage<'a> {
    envelope: &'a Envelope,
    span: Span,
    listing: Option<Listing>,
    bars: Vec<PriceBar>,
    links: Vec<String>,
}

impl<'a> StockHistoryPage<'a> {
    pub fn new(envelope: &'a Envelope, span: Span) -> Result<Self> {
        let text = envelope.text()?;
        let base = base_url(envelope)?;
        let document = Html::parse_document(&text);
        let url = envelope.url.as_str();

        let listing = parse_company(url, &document)?;

        let mut bars = Vec::new();
        if let Some(listing) = &listing {
            for row in document.select(&PRICE_ROW) {
                let cells: Vec<ElementRef> = row.select(&CELL).collect();
                if cells.is_empty() {
                    continue;
                }
                bars.push(parse_row(url, &listing.symbol, &cells)?);
            }
        }
        bars.sort_by(|a, b| b.date.cmp(&a.date));

        let links = document
            .select(&NEXT_PAGE)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| resolve_href(&base, href))
            .collect();
        let links = dedup_links(links);

        debug!(
            parent: &span,
            url,
            symbol = listing.as_ref().map(|l| l.symbol.as_str()),
            rows = bars.len(),
            "Extracted price history"
        );
        Ok(Self {
            envelope,
            span,
            listing,
            bars,
            links,
        })
    }

    pub fn listing(&self) -> Option<&Listing> {
        self.listing.as_ref()
    }

    /// Extracted rows, newest first.
    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn newest_date(&self) -> Option<NaiveDate> {
        self.bars.first().map(|b| b.date)
    }
}

/// `None` when the page has no company header at all (error page).
fn parse_company(url: &str, document: &Html) -> Result<Option<Listing>> {
    let Some(code) = document.select(&CODE).next() else {
        return Ok(None);
    };
    let symbol = element_text(code);
    if symbol.is_empty() {
        return Err(Error::invalid(url, "company header without a code"));
    }
    let name = document.select(&NAME).next().map(element_text).unwrap_or_default();
    if name.is_empty() {
        return Err(Error::invalid(url, format!("company {symbol} without a name")));
    }
    let market = document.select(&MARKET).next().map(element_text).unwrap_or_default();

    Ok(Some(Listing { symbol, name, market }))
}

fn parse_row(url: &str, symbol: &str, cells: &[ElementRef<'_>]) -> Result<PriceBar> {
    if cells.len() < CELLS_PER_ROW {
        return Err(Error::invalid(
            url,
            format!("expected {CELLS_PER_ROW} cells, found {}", cells.len()),
        ));
    }
    let invalid = |e: String| Error::invalid(url, e);
    let price = |i: usize| parse_price(&element_text(cells[i])).map_err(invalid);

    Ok(PriceBar {
        symbol: symbol.to_string(),
        date: parse_iso_date(&element_text(cells[0])).map_err(invalid)?,
        open: price(1)?,
        high: price(2)?,
        low: price(3)?,
        close: price(4)?,
        volume: parse_volume(&element_text(cells[5])).map_err(invalid)?,
        adjusted_close: price(6)?,
    })
}

#[async_trait]
impl<'a> DocumentParser for StockHistoryPage<'a> {
    fn redownload(&self, now: DateTime<Utc>) -> bool {
        freshness::price_history(now, self.envelope.fetched_at, self.newest_date())
    }

    fn is_valid(&self) -> bool {
        self.listing.is_some() && !self.bars.is_empty()
    }

    fn related_links(&self) -> Option<Vec<String>> {
        self.is_valid().then(|| self.links.clone())
    }

    async fn parse(&self, ctx: &mut ParseContext) -> Result<()> {
        let Some(listing) = self.listing.clone().filter(|_| self.is_valid()) else {
            debug!(parent: &self.span, url = %self.envelope.url, "No price rows, nothing to persist");
            return Ok(());
        };

        let mut records = Vec::with_capacity(self.bars.len() + 1);
        records.push(Record::Listing(listing));
        records.extend(self.bars.iter().cloned().map(Record::PriceBar));
        ctx.store().upsert_all(records).await?;

        info!(
            parent: &self.span,
            url = %self.envelope.url,
            rows = self.bars.len(),
            "Upserted listing and price bars"
        );
        Ok(())
    }
}

pub fn factory<'a>(envelope: &'a Envelope, span: Span) -> Result<Box<dyn DocumentParser + 'a>> {
    Ok(Box::new(StockHistoryPage::new(envelope, span)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    const PAGE: &str = r#"<html><body>
        <div class="company"><span class="code">7203</span><span class="name">Toyota Motor</span><span class="market">Prime</span></div>
        <table class="prices">
            <tr><th>Date</th><th>Open</th><th>High</th><th>Low</th><th>Close</th><th>Volume</th><th>Adj</th></tr>
            <tr><td>2024-04-25</td><td>3,500</td><td>3,550</td><td>3,480</td><td>3,520</td><td>12,000,000</td><td>3,520</td></tr>
            <tr><td>2024-04-30</td><td>3,600</td><td>3,650</td><td>3,580</td><td>3,620</td><td>10,500,000</td><td>3,620</td></tr>
        </table>
        <table class="prices">
            <tr><td>2024/04/26</td><td>-</td><td>-</td><td>-</td><td>-</td><td>-</td><td>-</td></tr>
        </table>
        <a rel="next" href="?page=2">Next</a>
    </body></html>"#;

    fn envelope(body: &str) -> Envelope {
        Envelope::new(
            "https://example.com/stocks/7203",
            body,
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        )
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_rows_sorted_newest_first_across_fragments() {
        let env = envelope(PAGE);
        let page = StockHistoryPage::new(&env, Span::none()).unwrap();

        let dates: Vec<_> = page.bars().iter().map(|b| b.date).collect();
        assert_eq!(dates, vec![day(2024, 4, 30), day(2024, 4, 26), day(2024, 4, 25)]);
        assert_eq!(page.bars()[0].volume, Some(10_500_000));
        assert_eq!(page.bars()[1].close, None);
        assert_eq!(page.listing().unwrap().market, "Prime");
        assert_eq!(
            page.related_links().unwrap(),
            vec!["https://example.com/stocks/7203?page=2"]
        );
    }

    #[test]
    fn test_redownload_requires_recent_rows() {
        let env = envelope(PAGE);
        let page = StockHistoryPage::new(&env, Span::none()).unwrap();
        assert!(page.redownload(env.fetched_at + Duration::days(1)));
        assert!(!page.redownload(env.fetched_at + Duration::hours(1)));
        assert!(!page.redownload(env.fetched_at + Duration::days(400)));
    }

    #[test]
    fn test_missing_company_header_is_invalid() {
        let env = envelope(r#"<table class="prices"><tr><td>2024-04-25</td></tr></table>"#);
        let page = StockHistoryPage::new(&env, Span::none()).unwrap();
        assert!(!page.is_valid());
        assert_eq!(page.related_links(), None);
    }

    #[test]
    fn test_short_row_aborts_the_document() {
        let env = envelope(
            r#"<div class="company"><span class="code">7203</span><span class="name">Toyota</span></div>
               <table class="prices"><tr><td>2024-04-25</td><td>1</td></tr></table>"#,
        );
        assert!(matches!(
            StockHistoryPage::new(&env, Span::none()),
            Err(Error::InvalidRecord { .. })
        ));
    }
}
