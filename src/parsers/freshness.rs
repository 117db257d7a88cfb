//! Redownload policies, one per source family.
//!
//! All of them are pure functions of `now`, the envelope's fetch time and
//! the newest date found in the document.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

/// Listing/monthly index pages are refetched once older than this.
pub fn index_page_max_age() -> Duration {
    Duration::hours(23)
}

/// Price history whose newest row is older than this is left alone.
pub fn price_history_horizon() -> Duration {
    Duration::days(365)
}

/// Yearly CSVs are refetched while their newest year is this recent.
pub const YEARLY_CSV_YEAR_SPAN: i32 = 2;

/// Pure link-enumeration pages: always refetch.
pub fn link_page() -> bool {
    true
}

/// Immutable archives: never refetch.
pub fn immutable() -> bool {
    false
}

/// Monthly and listing index pages: stale after 23 hours.
pub fn index_page(now: DateTime<Utc>, fetched_at: DateTime<Utc>) -> bool {
    now - fetched_at > index_page_max_age()
}

/// Per-stock price history: stale after 23 hours, but only while the stock
/// still trades (newest row within a year). No rows at all counts as recent.
pub fn price_history(now: DateTime<Utc>, fetched_at: DateTime<Utc>, newest: Option<NaiveDate>) -> bool {
    let recent = newest.map_or(true, |d| now.date_naive() - d < price_history_horizon());
    index_page(now, fetched_at) && recent
}

/// Yearly index CSVs: refetch while the file covers this year or last.
/// A CSV that yielded no rows is refetched.
pub fn yearly_csv(now: DateTime<Utc>, newest: Option<NaiveDate>) -> bool {
    newest.map_or(true, |d| now.year() - d.year() < YEARLY_CSV_YEAR_SPAN)
}
