//! Idempotent merge-by-natural-key.
//!
//! Look the row up by its natural key; insert when absent, otherwise
//! overwrite every non-key column and keep the row id. Upserting the same
//! candidate twice leaves the table exactly as one upsert did.

use chrono::Utc;
use diesel::prelude::*;

use super::records::LastInsertRowId;
use super::{date_key, with_index_table};
use crate::models::{ArchiveEntry, FilingFeedLink, IndexBar, IndexFamily, Listing, PriceBar, Record};
use crate::schema::{archive_entries, filing_feed_links, listings, price_bars};

/// A record that can be merged into its table by natural key.
pub trait Upsertable {
    /// Row id of the stored record with the same natural key, if any.
    fn find_existing(&self, conn: &mut SqliteConnection) -> QueryResult<Option<i32>>;

    /// Insert as a new row and return its id.
    fn insert_new(&self, conn: &mut SqliteConnection, now: &str) -> QueryResult<i32>;

    /// Overwrite the non-key columns of row `id`.
    fn overwrite(&self, conn: &mut SqliteConnection, id: i32, now: &str) -> QueryResult<()>;
}

/// Merge one record into the store, returning its row id.
///
/// Callers own the transaction; see `MarketStore::write`.
pub fn upsert<R: Upsertable + ?Sized>(conn: &mut SqliteConnection, record: &R) -> QueryResult<i32> {
    let now = Utc::now().to_rfc3339();
    match record.find_existing(conn)? {
        Some(id) => {
            record.overwrite(conn, id, &now)?;
            Ok(id)
        }
        None => record.insert_new(conn, &now),
    }
}

fn last_insert_rowid(conn: &mut SqliteConnection) -> QueryResult<i32> {
    diesel::sql_query("SELECT last_insert_rowid()")
        .get_result::<LastInsertRowId>(conn)
        .map(|r| r.id as i32)
}

impl Upsertable for Listing {
    fn find_existing(&self, conn: &mut SqliteConnection) -> QueryResult<Option<i32>> {
        listings::table
            .filter(listings::symbol.eq(&self.symbol))
            .select(listings::id)
            .first::<i32>(conn)
            .optional()
    }

    fn insert_new(&self, conn: &mut SqliteConnection, now: &str) -> QueryResult<i32> {
        diesel::insert_into(listings::table)
            .values((
                listings::symbol.eq(&self.symbol),
                listings::name.eq(&self.name),
                listings::market.eq(&self.market),
                listings::created_at.eq(now),
                listings::updated_at.eq(now),
            ))
            .execute(conn)?;
        last_insert_rowid(conn)
    }

    fn overwrite(&self, conn: &mut SqliteConnection, id: i32, now: &str) -> QueryResult<()> {
        diesel::update(listings::table.find(id))
            .set((
                listings::name.eq(&self.name),
                listings::market.eq(&self.market),
                listings::updated_at.eq(now),
            ))
            .execute(conn)?;
        Ok(())
    }
}

impl Upsertable for PriceBar {
    fn find_existing(&self, conn: &mut SqliteConnection) -> QueryResult<Option<i32>> {
        price_bars::table
            .filter(price_bars::symbol.eq(&self.symbol))
            .filter(price_bars::date.eq(date_key(self.date)))
            .select(price_bars::id)
            .first::<i32>(conn)
            .optional()
    }

    fn insert_new(&self, conn: &mut SqliteConnection, now: &str) -> QueryResult<i32> {
        diesel::insert_into(price_bars::table)
            .values((
                price_bars::symbol.eq(&self.symbol),
                price_bars::date.eq(date_key(self.date)),
                price_bars::open.eq(self.open),
                price_bars::high.eq(self.high),
                price_bars::low.eq(self.low),
                price_bars::close.eq(self.close),
                price_bars::volume.eq(self.volume),
                price_bars::adjusted_close.eq(self.adjusted_close),
                price_bars::created_at.eq(now),
                price_bars::updated_at.eq(now),
            ))
            .execute(conn)?;
        last_insert_rowid(conn)
    }

    fn overwrite(&self, conn: &mut SqliteConnection, id: i32, now: &str) -> QueryResult<()> {
        diesel::update(price_bars::table.find(id))
            .set((
                price_bars::open.eq(self.open),
                price_bars::high.eq(self.high),
                price_bars::low.eq(self.low),
                price_bars::close.eq(self.close),
                price_bars::volume.eq(self.volume),
                price_bars::adjusted_close.eq(self.adjusted_close),
                price_bars::updated_at.eq(now),
            ))
            .execute(conn)?;
        Ok(())
    }
}

/// An [`IndexBar`] paired with the family table it belongs in.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FamilyBar<'a> {
    pub family: IndexFamily,
    pub bar: &'a IndexBar,
}

/// Insert an index bar without looking for an existing row.
pub(crate) fn insert_index_bar(
    conn: &mut SqliteConnection,
    family: IndexFamily,
    bar: &IndexBar,
    now: &str,
) -> QueryResult<i32> {
    with_index_table!(family, t => {
        diesel::insert_into(t::table)
            .values((
                t::date.eq(date_key(bar.date)),
                t::open.eq(bar.open),
                t::high.eq(bar.high),
                t::low.eq(bar.low),
                t::close.eq(bar.close),
                t::created_at.eq(now),
                t::updated_at.eq(now),
            ))
            .execute(conn)?;
    });
    last_insert_rowid(conn)
}

impl Upsertable for FamilyBar<'_> {
    fn find_existing(&self, conn: &mut SqliteConnection) -> QueryResult<Option<i32>> {
        let date = date_key(self.bar.date);
        with_index_table!(self.family, t => {
            t::table
                .filter(t::date.eq(&date))
                .select(t::id)
                .first::<i32>(conn)
                .optional()
        })
    }

    fn insert_new(&self, conn: &mut SqliteConnection, now: &str) -> QueryResult<i32> {
        insert_index_bar(conn, self.family, self.bar, now)
    }

    fn overwrite(&self, conn: &mut SqliteConnection, id: i32, now: &str) -> QueryResult<()> {
        let bar = self.bar;
        with_index_table!(self.family, t => {
            diesel::update(t::table.find(id))
                .set((
                    t::open.eq(bar.open),
                    t::high.eq(bar.high),
                    t::low.eq(bar.low),
                    t::close.eq(bar.close),
                    t::updated_at.eq(now),
                ))
                .execute(conn)?;
        });
        Ok(())
    }
}

impl Upsertable for FilingFeedLink {
    fn find_existing(&self, conn: &mut SqliteConnection) -> QueryResult<Option<i32>> {
        filing_feed_links::table
            .filter(filing_feed_links::feed_id.eq(&self.feed_id))
            .filter(filing_feed_links::href.eq(&self.href))
            .select(filing_feed_links::id)
            .first::<i32>(conn)
            .optional()
    }

    fn insert_new(&self, conn: &mut SqliteConnection, now: &str) -> QueryResult<i32> {
        diesel::insert_into(filing_feed_links::table)
            .values((
                filing_feed_links::feed_id.eq(&self.feed_id),
                filing_feed_links::href.eq(&self.href),
                filing_feed_links::kind.eq(self.kind.as_str()),
                filing_feed_links::created_at.eq(now),
                filing_feed_links::updated_at.eq(now),
            ))
            .execute(conn)?;
        last_insert_rowid(conn)
    }

    fn overwrite(&self, conn: &mut SqliteConnection, id: i32, now: &str) -> QueryResult<()> {
        diesel::update(filing_feed_links::table.find(id))
            .set((
                filing_feed_links::kind.eq(self.kind.as_str()),
                filing_feed_links::updated_at.eq(now),
            ))
            .execute(conn)?;
        Ok(())
    }
}

// Every column of an archive entry is part of its key, so an overwrite only
// touches the timestamp.
impl Upsertable for ArchiveEntry {
    fn find_existing(&self, conn: &mut SqliteConnection) -> QueryResult<Option<i32>> {
        archive_entries::table
            .filter(archive_entries::filing_id.eq(&self.filing_id))
            .filter(archive_entries::entry_path.eq(&self.entry_path))
            .select(archive_entries::id)
            .first::<i32>(conn)
            .optional()
    }

    fn insert_new(&self, conn: &mut SqliteConnection, now: &str) -> QueryResult<i32> {
        diesel::insert_into(archive_entries::table)
            .values((
                archive_entries::filing_id.eq(&self.filing_id),
                archive_entries::entry_path.eq(&self.entry_path),
                archive_entries::created_at.eq(now),
                archive_entries::updated_at.eq(now),
            ))
            .execute(conn)?;
        last_insert_rowid(conn)
    }

    fn overwrite(&self, conn: &mut SqliteConnection, id: i32, now: &str) -> QueryResult<()> {
        diesel::update(archive_entries::table.find(id))
            .set(archive_entries::updated_at.eq(now))
            .execute(conn)?;
        Ok(())
    }
}

impl Upsertable for Record {
    fn find_existing(&self, conn: &mut SqliteConnection) -> QueryResult<Option<i32>> {
        match self {
            Record::Listing(r) => r.find_existing(conn),
            Record::PriceBar(r) => r.find_existing(conn),
            Record::IndexBar { family, bar } => FamilyBar { family: *family, bar }.find_existing(conn),
            Record::FilingFeedLink(r) => r.find_existing(conn),
            Record::ArchiveEntry(r) => r.find_existing(conn),
        }
    }

    fn insert_new(&self, conn: &mut SqliteConnection, now: &str) -> QueryResult<i32> {
        match self {
            Record::Listing(r) => r.insert_new(conn, now),
            Record::PriceBar(r) => r.insert_new(conn, now),
            Record::IndexBar { family, bar } => FamilyBar { family: *family, bar }.insert_new(conn, now),
            Record::FilingFeedLink(r) => r.insert_new(conn, now),
            Record::ArchiveEntry(r) => r.insert_new(conn, now),
        }
    }

    fn overwrite(&self, conn: &mut SqliteConnection, id: i32, now: &str) -> QueryResult<()> {
        match self {
            Record::Listing(r) => r.overwrite(conn, id, now),
            Record::PriceBar(r) => r.overwrite(conn, id, now),
            Record::IndexBar { family, bar } => FamilyBar { family: *family, bar }.overwrite(conn, id, now),
            Record::FilingFeedLink(r) => r.overwrite(conn, id, now),
            Record::ArchiveEntry(r) => r.overwrite(conn, id, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::setup_test_store;
    use chrono::NaiveDate;

    fn bar(symbol: &str, day: u32, close: Option<f64>) -> PriceBar {
        PriceBar {
            symbol: symbol.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: Some(100.0),
            high: Some(110.0),
            low: Some(95.0),
            close,
            volume: Some(12_000),
            adjusted_close: close,
        }
    }

    #[tokio::test]
    async fn test_upsert_same_candidate_twice_is_noop() {
        let (store, _dir) = setup_test_store().await;
        let listing = Listing {
            symbol: "7203".to_string(),
            name: "Toyota Motor".to_string(),
            market: "Prime".to_string(),
        };

        let first = store.write({
            let l = listing.clone();
            move |conn| upsert(conn, &l)
        })
        .await
        .unwrap();
        let second = store.write({
            let l = listing.clone();
            move |conn| upsert(conn, &l)
        })
        .await
        .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.count_listings().await.unwrap(), 1);
        assert_eq!(store.listings().await.unwrap()[0].name, "Toyota Motor");
    }

    #[tokio::test]
    async fn test_upsert_overwrites_non_key_fields_in_place() {
        let (store, _dir) = setup_test_store().await;

        let ids = store
            .upsert_all(vec![bar("7203", 4, Some(2500.0)), bar("7203", 5, None)])
            .await
            .unwrap();
        let updated = store
            .upsert_all(vec![bar("7203", 5, Some(2550.5))])
            .await
            .unwrap();

        assert_eq!(updated[0], ids[1]);
        let bars = store.price_bars("7203").await.unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].date, "2024-01-05");
        assert_eq!(bars[1].close, Some(2550.5));
    }

    #[tokio::test]
    async fn test_upsert_keys_index_bars_per_family() {
        let (store, _dir) = setup_test_store().await;
        let day = IndexBar {
            date: NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(),
            open: Some(33_193.05),
            high: Some(33_293.17),
            low: Some(32_693.18),
            close: Some(33_288.29),
        };
        let records = vec![
            Record::IndexBar { family: IndexFamily::Nikkei, bar: day.clone() },
            Record::IndexBar { family: IndexFamily::Topix, bar: day.clone() },
            Record::IndexBar { family: IndexFamily::Nikkei, bar: day },
        ];

        let ids = store.upsert_all(records).await.unwrap();

        assert_eq!(ids[0], ids[2]);
        assert_eq!(store.count_index_bars(IndexFamily::Nikkei).await.unwrap(), 1);
        assert_eq!(store.count_index_bars(IndexFamily::Topix).await.unwrap(), 1);
        assert_eq!(store.count_index_bars(IndexFamily::Dow).await.unwrap(), 0);
    }
}
