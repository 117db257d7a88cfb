//! Delete-then-insert of a whole calendar year in an index table.
//!
//! Used for sources that republish an entire year at once: after a replace,
//! the stored rows for that year are exactly the batch, with no leftovers.
//! Rows a file carries from a neighbouring year never widen the deleted
//! range; they are upserted one by one instead.

use chrono::{Datelike, NaiveDate, Utc};
use diesel::prelude::*;

use super::upsert::{insert_index_bar, upsert, FamilyBar};
use super::{date_key, with_index_table};
use crate::error::{Error, Result};
use crate::models::{IndexBar, IndexFamily};

/// Row counts from one year's replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub deleted: usize,
    pub inserted: usize,
    /// Rows outside the replaced year, written by key.
    pub upserted: usize,
}

/// Check that every bar of a batch falls inside `year`.
pub fn check_batch_year(year: i32, bars: &[IndexBar]) -> Result<()> {
    match bars.iter().find(|bar| bar.date.year() != year) {
        Some(bar) => Err(Error::YearMismatch { year, date: bar.date }),
        None => Ok(()),
    }
}

/// Replace the stored rows of `year` in `family`'s table with `bars`, then
/// upsert `spill` without deleting anything around it.
///
/// Must run inside a transaction (see `MarketStore::replace_index_year`);
/// this function deletes and inserts but does not commit. Bars are assumed
/// to be checked with [`check_batch_year`].
pub fn replace_year(
    conn: &mut SqliteConnection,
    family: IndexFamily,
    year: i32,
    bars: &[IndexBar],
    spill: &[IndexBar],
) -> QueryResult<ReplaceOutcome> {
    let (first, last) = year_bounds(year);
    let now = Utc::now().to_rfc3339();

    let deleted = with_index_table!(family, t => {
        diesel::delete(t::table.filter(t::date.between(&first, &last))).execute(conn)?
    });

    for bar in bars {
        insert_index_bar(conn, family, bar, &now)?;
    }
    for bar in spill {
        upsert(conn, &FamilyBar { family, bar })?;
    }

    Ok(ReplaceOutcome {
        deleted,
        inserted: bars.len(),
        upserted: spill.len(),
    })
}

/// First and last day of `year` as date keys.
fn year_bounds(year: i32) -> (String, String) {
    let first = NaiveDate::from_ymd_opt(year, 1, 1).map(date_key);
    let last = NaiveDate::from_ymd_opt(year, 12, 31).map(date_key);
    (
        first.unwrap_or_else(|| format!("{year:04}-01-01")),
        last.unwrap_or_else(|| format!("{year:04}-12-31")),
    )
}
