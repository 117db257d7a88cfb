//! Yearly index CSV dumps (TOPIX, Dow Jones).
//!
//! Both sources republish a whole calendar year per file, so rows are not
//! upserted one by one: the file's year replaces the stored rows of that
//! year. The year comes from the file name (`1999.csv`) when a row matches
//! it, otherwise from the year most rows fall in. Rows from any other year
//! are upserted by date and never clear the rest of their year.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use regex::Regex;
use tracing::{debug, info, Span};

use super::normalize::{base_url, parse_iso_date, parse_price, parse_us_short_date};
use super::{freshness, DocumentParser, ParseContext};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::models::{IndexBar, IndexFamily};

type DateParser = fn(&str) -> Result<NaiveDate, String>;

/// Columns: Date, Open, High, Low, Close.
const COLUMNS: usize = 5;

static FILE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)((?:19|20)\d{2})(?:\D|$)").expect("static regex"));

/// The rows of one file split for storage.
#[derive(Debug, Clone, PartialEq)]
pub struct YearBatch {
    pub year: i32,
    /// Rows inside `year`; they become exactly that year's stored rows.
    pub bars: Vec<IndexBar>,
    /// Rows from other years, upserted by date.
    pub spill: Vec<IndexBar>,
}

pub struct IndexCsv<'a> {
    envelope: &'a Envelope,
    span: Span,
    family: IndexFamily,
    bars: Vec<IndexBar>,
}

impl<'a> IndexCsv<'a> {
    /// TOPIX export, dated `YYYY/MM/DD`.
    pub fn topix(envelope: &'a Envelope, span: Span) -> Result<Self> {
        Self::new(envelope, span, IndexFamily::Topix, parse_iso_date)
    }

    /// Dow Jones export, dated `MM/DD/YY`.
    pub fn dow(envelope: &'a Envelope, span: Span) -> Result<Self> {
        Self::new(envelope, span, IndexFamily::Dow, parse_us_short_date)
    }

    fn new(envelope: &'a Envelope, span: Span, family: IndexFamily, parse_date: DateParser) -> Result<Self> {
        let url = envelope.url.as_str();
        let text = envelope.text()?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let mut bars = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|e| Error::malformed(url, e))?;
            if row.len() < COLUMNS {
                return Err(Error::invalid(
                    url,
                    format!("expected {COLUMNS} columns, found {}", row.len()),
                ));
            }
            let price = |i: usize| parse_price(&row[i]).map_err(|e| Error::invalid(url, e));
            bars.push(IndexBar {
                date: parse_date(&row[0]).map_err(|e| Error::invalid(url, e))?,
                open: price(1)?,
                high: price(2)?,
                low: price(3)?,
                close: price(4)?,
            });
        }

        debug!(
            parent: &span,
            url,
            family = family.as_str(),
            rows = bars.len(),
            "Extracted index CSV rows"
        );
        Ok(Self {
            envelope,
            span,
            family,
            bars,
        })
    }

    pub fn family(&self) -> IndexFamily {
        self.family
    }

    pub fn bars(&self) -> &[IndexBar] {
        &self.bars
    }

    pub fn newest_date(&self) -> Option<NaiveDate> {
        self.bars.iter().map(|b| b.date).max()
    }

    /// The calendar year this file republishes.
    pub fn replaced_year(&self) -> Option<i32> {
        let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
        for bar in &self.bars {
            *counts.entry(bar.date.year()).or_default() += 1;
        }

        let named = file_year(self.envelope).filter(|year| counts.contains_key(year));
        // ties go to the earliest year
        named.or_else(|| {
            counts
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
                .map(|(year, _)| *year)
        })
    }

    /// Rows split into the replaced year and the spill-over around it.
    pub fn year_batch(&self) -> Option<YearBatch> {
        let year = self.replaced_year()?;
        let (bars, spill): (Vec<_>, Vec<_>) = self
            .bars
            .iter()
            .cloned()
            .partition(|bar| bar.date.year() == year);
        Some(YearBatch { year, bars, spill })
    }
}

/// A four-digit year in the last path segment, e.g. `/indices/dow/1999.csv`.
fn file_year(envelope: &Envelope) -> Option<i32> {
    let url = base_url(envelope).ok()?;
    let last = url.path_segments()?.next_back()?;
    FILE_YEAR.captures(last)?.get(1)?.as_str().parse().ok()
}

#[async_trait]
impl<'a> DocumentParser for IndexCsv<'a> {
    fn redownload(&self, now: DateTime<Utc>) -> bool {
        freshness::yearly_csv(now, self.newest_date())
    }

    fn is_valid(&self) -> bool {
        !self.bars.is_empty()
    }

    fn related_links(&self) -> Option<Vec<String>> {
        self.is_valid().then(Vec::new)
    }

    async fn parse(&self, ctx: &mut ParseContext) -> Result<()> {
        if !self.is_valid() {
            debug!(parent: &self.span, url = %self.envelope.url, "Empty index CSV, nothing to replace");
            return Ok(());
        }

        let Some(YearBatch { year, bars, spill }) = self.year_batch() else {
            return Ok(());
        };
        let outcome = ctx
            .store()
            .replace_index_year(self.family, year, bars, spill)
            .await?;

        info!(
            parent: &self.span,
            url = %self.envelope.url,
            family = self.family.as_str(),
            year,
            deleted = outcome.deleted,
            inserted = outcome.inserted,
            upserted = outcome.upserted,
            "Replaced index CSV year"
        );
        Ok(())
    }
}

pub fn topix_factory<'a>(envelope: &'a Envelope, span: Span) -> Result<Box<dyn DocumentParser + 'a>> {
    Ok(Box::new(IndexCsv::topix(envelope, span)?))
}

pub fn dow_factory<'a>(envelope: &'a Envelope, span: Span) -> Result<Box<dyn DocumentParser + 'a>> {
    Ok(Box::new(IndexCsv::dow(envelope, span)?))
}
