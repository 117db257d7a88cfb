//! Durable store for extracted market records.
//!
//! Sync Diesel over an r2d2 SQLite pool, driven from async code through
//! [`pool::run_blocking`]. Transactions are opened by the helpers in
//! [`upsert`] and [`range_replace`] via [`MarketStore`], never implicitly.

use chrono::NaiveDate;

/// Date column format. Lexicographic order of the text equals date order.
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Render a date as stored in the date columns.
pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a stored date column, if well-formed.
pub fn parse_date_key(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

/// Run `$body` with `$table` bound to the schema module of an index family.
///
/// The three index tables share a shape but are distinct Diesel types, so
/// generic code over them goes through this dispatch.
macro_rules! with_index_table {
    ($family:expr, $table:ident => $body:block) => {
        match $family {
            $crate::models::IndexFamily::Nikkei => {
                use $crate::schema::nikkei_bars as $table;
                $body
            }
            $crate::models::IndexFamily::Topix => {
                use $crate::schema::topix_bars as $table;
                $body
            }
            $crate::models::IndexFamily::Dow => {
                use $crate::schema::dow_bars as $table;
                $body
            }
        }
    };
}
pub(crate) use with_index_table;

pub mod market;
pub mod pool;
pub mod range_replace;
pub mod records;
pub mod upsert;

pub use market::{ListingView, MarketStore, PriceBarView};
pub use pool::{create_diesel_pool, create_diesel_pool_from_url, run_blocking, DieselError, SqlitePool};
pub use upsert::{upsert, Upsertable};

#[cfg(test)]
pub(crate) mod test_support {
    use super::MarketStore;
    use tempfile::TempDir;

    /// Open a store on a fresh temporary database with all tables created.
    pub async fn setup_test_store() -> (MarketStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let store = MarketStore::open_path(&db_path, 4).await.unwrap();
        (store, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_key_round_trip_is_sortable() {
        let a = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        let b = NaiveDate::from_ymd_opt(2000, 1, 2).unwrap();
        assert_eq!(date_key(a), "1999-12-31");
        assert!(date_key(a) < date_key(b));
        assert_eq!(parse_date_key(&date_key(b)), Some(b));
        assert_eq!(parse_date_key("2000/01/02"), None);
    }
}
