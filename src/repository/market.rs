//! The store handle passed to parser plugins.
//!
//! Every write entry point opens its own IMMEDIATE transaction, so the SQLite
//! write lock is taken before the first read. Two upserts of the same key, or
//! two replacements of the same year, serialize instead of interleaving, and
//! WAL readers only ever see committed states.

use std::collections::HashMap;
use std::path::Path;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use super::pool::{create_diesel_pool, run_blocking, SqlitePool};
use super::range_replace::{check_batch_year, replace_year, ReplaceOutcome};
use super::records::{ArchiveEntryRecord, FilingFeedLinkRecord, IndexBarRow, ListingRecord, PriceBarRecord};
use super::upsert::{upsert, Upsertable};
use super::{parse_date_key, with_index_table};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::models::{ArchiveEntry, FilingFeedLink, FilingLinkKind, IndexBar, IndexFamily, Record};
use crate::schema::{archive_entries, filing_feed_links, listings, price_bars};

/// A listing as exposed to read-side consumers (no ids or timestamps).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingView {
    pub symbol: String,
    pub name: String,
    pub market: String,
}

impl From<ListingRecord> for ListingView {
    fn from(record: ListingRecord) -> Self {
        ListingView {
            symbol: record.symbol,
            name: record.name,
            market: record.market,
        }
    }
}

/// A price bar as exposed to read-side consumers (no ids or timestamps).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceBarView {
    pub date: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<i64>,
    pub adjusted_close: Option<f64>,
}

impl From<PriceBarRecord> for PriceBarView {
    fn from(record: PriceBarRecord) -> Self {
        PriceBarView {
            date: record.date,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: record.volume,
            adjusted_close: record.adjusted_close,
        }
    }
}

/// Handle to the market record store.
#[derive(Clone)]
pub struct MarketStore {
    pool: SqlitePool,
}

impl MarketStore {
    /// Wrap an existing pool. Tables are not created.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the store described by `settings`, creating directories and tables.
    pub async fn open(settings: &Settings) -> Result<Self> {
        settings
            .ensure_directories()
            .map_err(|e| Error::Database(io_error(e)))?;
        Self::open_path(&settings.database_path(), settings.pool_max_size).await
    }

    /// Open (or create) a database file and make sure all tables exist.
    pub async fn open_path(db_path: &Path, max_size: u32) -> Result<Self> {
        let pool = create_diesel_pool(db_path, max_size).map_err(|e| Error::Database(io_error(e)))?;
        let store = Self::new(pool);
        store.ensure_tables().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create every table this crate writes, if missing.
    pub async fn ensure_tables(&self) -> Result<()> {
        let mut ddl = String::from(
            r#"
            CREATE TABLE IF NOT EXISTS listings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                market TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS price_bars (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                date TEXT NOT NULL,
                open REAL,
                high REAL,
                low REAL,
                close REAL,
                volume INTEGER,
                adjusted_close REAL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(symbol, date)
            );

            CREATE TABLE IF NOT EXISTS filing_feed_links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                feed_id TEXT NOT NULL,
                href TEXT NOT NULL,
                kind TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(feed_id, href)
            );

            CREATE TABLE IF NOT EXISTS archive_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filing_id TEXT NOT NULL,
                entry_path TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(filing_id, entry_path)
            );
            "#,
        );
        for family in [IndexFamily::Nikkei, IndexFamily::Topix, IndexFamily::Dow] {
            ddl.push_str(&format!(
                r#"
            CREATE TABLE IF NOT EXISTS {}_bars (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL UNIQUE,
                open REAL,
                high REAL,
                low REAL,
                close REAL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
                family.as_str()
            ));
        }

        run_blocking(self.pool.clone(), move |conn| conn.batch_execute(&ddl)).await?;
        Ok(())
    }

    // ========================================================================
    // Write Operations
    // ========================================================================

    /// Run `f` inside one IMMEDIATE transaction; any error rolls all of it back.
    pub async fn write<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> QueryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        Ok(run_blocking(pool, move |conn| conn.immediate_transaction(f)).await?)
    }

    /// Upsert a batch of records all-or-nothing, returning their row ids.
    pub async fn upsert_all<R>(&self, records: Vec<R>) -> Result<Vec<i32>>
    where
        R: Upsertable + Send + 'static,
    {
        self.write(move |conn| records.iter().map(|r| upsert(conn, r)).collect())
            .await
    }

    /// Replace one calendar year of an index table in a single transaction.
    ///
    /// `bars` must all fall in `year` and become exactly that year's stored
    /// rows. `spill` holds rows from neighbouring years; they are upserted
    /// and never clear the rest of their year.
    pub async fn replace_index_year(
        &self,
        family: IndexFamily,
        year: i32,
        bars: Vec<IndexBar>,
        spill: Vec<IndexBar>,
    ) -> Result<ReplaceOutcome> {
        check_batch_year(year, &bars)?;

        let outcome = self
            .write(move |conn| replace_year(conn, family, year, &bars, &spill))
            .await?;

        info!(
            family = family.as_str(),
            year,
            deleted = outcome.deleted,
            inserted = outcome.inserted,
            upserted = outcome.upserted,
            "Replaced index year"
        );
        Ok(outcome)
    }

    /// Flush context-accumulated records through the same idempotent upsert.
    ///
    /// Returns the number of records written.
    pub async fn persist_context(&self, records: &HashMap<String, Vec<Record>>) -> Result<usize> {
        let flat: Vec<Record> = records.values().flatten().cloned().collect();
        let count = flat.len();
        self.upsert_all(flat).await?;
        Ok(count)
    }

    // ========================================================================
    // Read Operations
    // ========================================================================

    /// All listings, ordered by symbol.
    pub async fn listings(&self) -> Result<Vec<ListingView>> {
        let records = run_blocking(self.pool.clone(), move |conn| {
            listings::table
                .order(listings::symbol.asc())
                .select(ListingRecord::as_select())
                .load(conn)
        })
        .await?;
        Ok(records.into_iter().map(ListingView::from).collect())
    }

    /// All price bars of one symbol, oldest first.
    pub async fn price_bars(&self, symbol: &str) -> Result<Vec<PriceBarView>> {
        let symbol = symbol.to_string();
        let records = run_blocking(self.pool.clone(), move |conn| {
            price_bars::table
                .filter(price_bars::symbol.eq(&symbol))
                .order(price_bars::date.asc())
                .select(PriceBarRecord::as_select())
                .load(conn)
        })
        .await?;
        Ok(records.into_iter().map(PriceBarView::from).collect())
    }

    /// All bars of one index family, oldest first.
    pub async fn index_bars(&self, family: IndexFamily) -> Result<Vec<IndexBar>> {
        let rows: Vec<IndexBarRow> = run_blocking(self.pool.clone(), move |conn| {
            with_index_table!(family, t => {
                t::table
                    .order(t::date.asc())
                    .select((t::date, t::open, t::high, t::low, t::close))
                    .load::<IndexBarRow>(conn)
            })
        })
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(date, open, high, low, close)| match parse_date_key(&date) {
                Some(date) => Some(IndexBar { date, open, high, low, close }),
                None => {
                    warn!(family = family.as_str(), date = %date, "Skipping index bar with unreadable date");
                    None
                }
            })
            .collect())
    }

    /// Links stored for one filing feed.
    pub async fn feed_links(&self, feed_id: &str) -> Result<Vec<FilingFeedLink>> {
        let feed_id = feed_id.to_string();
        let records = run_blocking(self.pool.clone(), move |conn| {
            filing_feed_links::table
                .filter(filing_feed_links::feed_id.eq(&feed_id))
                .order(filing_feed_links::id.asc())
                .select(FilingFeedLinkRecord::as_select())
                .load(conn)
        })
        .await?;
        Ok(records
            .into_iter()
            .map(|r| FilingFeedLink {
                kind: FilingLinkKind::from_str(&r.kind).unwrap_or(FilingLinkKind::Other),
                feed_id: r.feed_id,
                href: r.href,
            })
            .collect())
    }

    /// Entries stored for one filing archive.
    pub async fn archive_entries(&self, filing_id: &str) -> Result<Vec<ArchiveEntry>> {
        let filing_id = filing_id.to_string();
        let records = run_blocking(self.pool.clone(), move |conn| {
            archive_entries::table
                .filter(archive_entries::filing_id.eq(&filing_id))
                .order(archive_entries::entry_path.asc())
                .select(ArchiveEntryRecord::as_select())
                .load(conn)
        })
        .await?;
        Ok(records
            .into_iter()
            .map(|r| ArchiveEntry {
                filing_id: r.filing_id,
                entry_path: r.entry_path,
            })
            .collect())
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Count all listings.
    pub async fn count_listings(&self) -> Result<u64> {
        let count = run_blocking(self.pool.clone(), move |conn| {
            listings::table.count().get_result::<i64>(conn)
        })
        .await?;
        Ok(count as u64)
    }

    /// Count price bars of one symbol.
    pub async fn count_price_bars(&self, symbol: &str) -> Result<u64> {
        let symbol = symbol.to_string();
        let count = run_blocking(self.pool.clone(), move |conn| {
            price_bars::table
                .filter(price_bars::symbol.eq(&symbol))
                .count()
                .get_result::<i64>(conn)
        })
        .await?;
        Ok(count as u64)
    }

    /// Count bars of one index family.
    pub async fn count_index_bars(&self, family: IndexFamily) -> Result<u64> {
        let count = run_blocking(self.pool.clone(), move |conn| {
            with_index_table!(family, t => { t::table.count().get_result::<i64>(conn) })
        })
        .await?;
        Ok(count as u64)
    }
}

/// Surface setup failures (pool creation, directory creation) as store errors.
fn io_error(e: impl std::fmt::Display) -> diesel::result::Error {
    diesel::result::Error::DatabaseError(
        diesel::result::DatabaseErrorKind::Unknown,
        Box::new(e.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Listing;
    use crate::repository::test_support::setup_test_store;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let (store, dir) = setup_test_store().await;
        store.ensure_tables().await.unwrap();
        let reopened = MarketStore::open_path(&dir.path().join("test.db"), 2).await.unwrap();
        assert_eq!(reopened.count_listings().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back() {
        let (store, _dir) = setup_test_store().await;

        let result = store
            .write(|conn| {
                upsert(
                    conn,
                    &Listing {
                        symbol: "9984".to_string(),
                        name: "SoftBank Group".to_string(),
                        market: "Prime".to_string(),
                    },
                )?;
                Err::<(), _>(diesel::result::Error::RollbackTransaction)
            })
            .await;

        assert!(result.is_err());
        assert_eq!(store.count_listings().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persist_context_upserts_every_record() {
        let (store, _dir) = setup_test_store().await;
        let mut records = HashMap::new();
        records.insert(
            "urn:feed:1".to_string(),
            vec![Record::FilingFeedLink(FilingFeedLink {
                feed_id: "urn:feed:1".to_string(),
                href: "https://example.com/S100ABCD.zip".to_string(),
                kind: FilingLinkKind::Archive,
            })],
        );
        records.insert(
            "S100ABCD".to_string(),
            vec![
                Record::ArchiveEntry(ArchiveEntry {
                    filing_id: "S100ABCD".to_string(),
                    entry_path: "b.htm".to_string(),
                }),
                Record::ArchiveEntry(ArchiveEntry {
                    filing_id: "S100ABCD".to_string(),
                    entry_path: "a.htm".to_string(),
                }),
            ],
        );

        assert_eq!(store.persist_context(&records).await.unwrap(), 3);
        assert_eq!(store.persist_context(&records).await.unwrap(), 3);

        let links = store.feed_links("urn:feed:1").await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].kind, FilingLinkKind::Archive);
        let entries: Vec<String> = store
            .archive_entries("S100ABCD")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.entry_path)
            .collect();
        assert_eq!(entries, vec!["a.htm", "b.htm"]);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_of_disjoint_keys() {
        let (store, _dir) = setup_test_store().await;
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .upsert_all(vec![Listing {
                        symbol: format!("{}", 1000 + i),
                        name: format!("Company {i}"),
                        market: "Standard".to_string(),
                    }])
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.count_listings().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_concurrent_replaces_of_one_year_leave_a_single_batch() {
        let (store, _dir) = setup_test_store().await;
        let batch = |writer: u32| -> Vec<IndexBar> {
            (1..=writer + 2)
                .map(|day| IndexBar {
                    date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
                    open: None,
                    high: None,
                    low: None,
                    close: Some(f64::from(writer * 100 + day)),
                })
                .collect()
        };
        let batches: Vec<Vec<IndexBar>> = (0..6).map(batch).collect();

        let mut handles = Vec::new();
        for bars in batches.clone() {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .replace_index_year(IndexFamily::Topix, 2024, bars, Vec::new())
                    .await
            }));
        }

        // Readers racing the writers see either nothing or one whole batch.
        for _ in 0..20 {
            let seen = store.index_bars(IndexFamily::Topix).await.unwrap();
            assert!(seen.is_empty() || batches.contains(&seen), "partial year: {seen:?}");
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = store.index_bars(IndexFamily::Topix).await.unwrap();
        assert!(batches.contains(&stored));
        assert_eq!(
            store.count_index_bars(IndexFamily::Topix).await.unwrap(),
            stored.len() as u64
        );
    }
}
