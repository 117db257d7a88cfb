//! Diesel ORM models for database tables.
//!
//! Writes go through the tuple-valued statements in `upsert` and
//! `range_replace`; these structs cover the read side.

use diesel::prelude::*;

use crate::schema;

/// Listing record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::listings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ListingRecord {
    pub id: i32,
    pub symbol: String,
    pub name: String,
    pub market: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Price bar record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::price_bars)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PriceBarRecord {
    pub id: i32,
    pub symbol: String,
    pub date: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<i64>,
    pub adjusted_close: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Filing feed link record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::filing_feed_links)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FilingFeedLinkRecord {
    pub id: i32,
    pub feed_id: String,
    pub href: String,
    pub kind: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Archive entry record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::archive_entries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ArchiveEntryRecord {
    pub id: i32,
    pub filing_id: String,
    pub entry_path: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Index bar columns, shared by the three index tables.
pub type IndexBarRow = (String, Option<f64>, Option<f64>, Option<f64>, Option<f64>);

#[derive(diesel::QueryableByName)]
pub(crate) struct LastInsertRowId {
    #[diesel(sql_type = diesel::sql_types::BigInt, column_name = "last_insert_rowid()")]
    pub id: i64,
}
