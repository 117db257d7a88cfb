//! Monthly Nikkei 225 tables: one row per trading day.
//!
//! Cells run date, close, open, high, low. The date cell is split over
//! several text nodes with inconsistent separators, so it is assembled by
//! concatenation and sliced at fixed offsets. Rows without exactly five
//! cells of their own (headers, site chrome, error-page layout tables) are
//! not trading days and are skipped.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, Span};

use super::normalize::{element_text, joined_text_nodes, parse_price, parse_sliced_date};
use super::{freshness, DocumentParser, ParseContext};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::models::{IndexBar, IndexFamily, Record};

static ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table tr").expect("static selector"));

const CELLS_PER_ROW: usize = 5;

pub struct NikkeiMonthlyPage<'a> {
    envelope: &'a Envelope,
    span: Span,
    bars: Vec<IndexBar>,
}

impl<'a> NikkeiMonthlyPage<'a> {
    pub fn new(envelope: &'a Envelope, span: Span) -> Result<Self> {
        let text = envelope.text()?;
        let document = Html::parse_document(&text);

        let mut bars = Vec::new();
        for row in document.select(&ROW) {
            let cells: Vec<ElementRef> = row
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|cell| cell.value().name() == "td")
                .collect();
            if cells.len() != CELLS_PER_ROW {
                continue;
            }
            bars.push(parse_row(&envelope.url, &cells)?);
        }

        debug!(parent: &span, url = %envelope.url, rows = bars.len(), "Extracted Nikkei rows");
        Ok(Self { envelope, span, bars })
    }

    pub fn bars(&self) -> &[IndexBar] {
        &self.bars
    }
}

/// `cells` holds exactly [`CELLS_PER_ROW`] cells.
fn parse_row(url: &str, cells: &[ElementRef<'_>]) -> Result<IndexBar> {
    let price = |i: usize| parse_price(&element_text(cells[i])).map_err(|e| Error::invalid(url, e));

    Ok(IndexBar {
        date: parse_sliced_date(&joined_text_nodes(cells[0])).map_err(|e| Error::invalid(url, e))?,
        close: price(1)?,
        open: price(2)?,
        high: price(3)?,
        low: price(4)?,
    })
}

#[async_trait]
impl<'a> DocumentParser for NikkeiMonthlyPage<'a> {
    fn redownload(&self, now: DateTime<Utc>) -> bool {
        freshness::index_page(now, self.envelope.fetched_at)
    }

    fn is_valid(&self) -> bool {
        !self.bars.is_empty()
    }

    fn related_links(&self) -> Option<Vec<String>> {
        self.is_valid().then(Vec::new)
    }

    async fn parse(&self, ctx: &mut ParseContext) -> Result<()> {
        if !self.is_valid() {
            debug!(parent: &self.span, url = %self.envelope.url, "No Nikkei rows, nothing to persist");
            return Ok(());
        }

        let records: Vec<Record> = self
            .bars
            .iter()
            .map(|bar| Record::IndexBar {
                family: IndexFamily::Nikkei,
                bar: bar.clone(),
            })
            .collect();
        let ids = ctx.store().upsert_all(records).await?;

        info!(parent: &self.span, url = %self.envelope.url, rows = ids.len(), "Upserted Nikkei bars");
        Ok(())
    }
}

pub fn factory<'a>(envelope: &'a Envelope, span: Span) -> Result<Box<dyn DocumentParser + 'a>> {
    Ok(Box::new(NikkeiMonthlyPage::new(envelope, span)?))
}
