//! Parser plugins, one per content family.
//!
//! Every plugin is built from an [`Envelope`] (plus a tracing span that
//! stands in for its logger) and then answers four questions for the
//! scheduler: is the cached copy stale, did the document contain anything,
//! what should be fetched next, and what does it write.
//!
//! Extraction runs eagerly in each plugin's constructor, so a plugin holds
//! only plain records and is `Send + Sync`. The HTML/XML trees are gone by
//! the time `parse` is awaited.

pub mod filing_archive;
pub mod filing_feed;
pub mod freshness;
pub mod index_csv;
pub mod market_listings;
pub mod nikkei_monthly;
pub mod normalize;
pub mod registry;
pub mod stock_history;
pub mod stock_list;
pub mod year_links;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Span;

use crate::envelope::Envelope;
use crate::error::Result;
use crate::models::Record;
use crate::repository::MarketStore;

/// What a plugin reports back to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseResult {
    pub valid: bool,
    pub redownload: bool,
    pub related_links: Option<Vec<String>>,
}

/// State shared by the plugins of one mutation: the store handle for
/// direct writers, and the accumulation map for everyone else.
#[derive(Clone)]
pub struct ParseContext {
    store: MarketStore,
    records: HashMap<String, Vec<Record>>,
}

impl ParseContext {
    pub fn new(store: MarketStore) -> Self {
        Self {
            store,
            records: HashMap::new(),
        }
    }

    pub fn store(&self) -> &MarketStore {
        &self.store
    }

    /// Everything accumulated so far, keyed by document-scoped identifier.
    pub fn records(&self) -> &HashMap<String, Vec<Record>> {
        &self.records
    }

    /// Records accumulated under one key.
    pub fn get(&self, key: &str) -> Option<&[Record]> {
        self.records.get(key).map(Vec::as_slice)
    }

    /// Append records under `key`, after whatever is already there.
    ///
    /// An empty batch leaves the map untouched (no empty entry is created).
    pub fn append(&mut self, key: impl Into<String>, records: Vec<Record>) {
        if records.is_empty() {
            return;
        }
        self.records.entry(key.into()).or_default().extend(records);
    }

    pub fn into_records(self) -> HashMap<String, Vec<Record>> {
        self.records
    }
}

/// The contract every content-family plugin implements.
///
/// After construction the methods may be called any number of times, in
/// any order; construction itself is never repeated for an instance.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Whether the cached copy is stale enough to refetch. Pure in `now`,
    /// the envelope's fetch time and the dates extracted from the document.
    fn redownload(&self, now: DateTime<Utc>) -> bool;

    /// Whether the document yielded anything. Link enumeration pages are
    /// always valid.
    fn is_valid(&self) -> bool;

    /// Further documents to fetch, as absolute URLs. `None` when the
    /// document is not valid.
    fn related_links(&self) -> Option<Vec<String>>;

    /// Perform the plugin's side effect: write to the store, or append to
    /// the context map. A no-op when the document is not valid.
    async fn parse(&self, ctx: &mut ParseContext) -> Result<()>;

    /// Bundle the three queries for the scheduler.
    fn result(&self, now: DateTime<Utc>) -> ParseResult {
        ParseResult {
            valid: self.is_valid(),
            redownload: self.redownload(now),
            related_links: self.related_links(),
        }
    }
}

/// Builds a plugin for an envelope. The plugin borrows the envelope.
pub type ParserFactory = for<'a> fn(&'a Envelope, Span) -> Result<Box<dyn DocumentParser + 'a>>;
