//! Error types shared by the parser plugins and the store.

use chrono::NaiveDate;
use thiserror::Error;

/// Crate-wide error type.
///
/// Zero-match documents are not errors; they surface as `is_valid() == false`.
#[derive(Debug, Error)]
pub enum Error {
    /// The document could not be decoded at all (bad charset, corrupt zip,
    /// broken XML/CSV framing).
    #[error("malformed document {url}: {reason}")]
    MalformedDocument { url: String, reason: String },

    /// A required field of an extracted record failed validation. Aborts the
    /// whole document.
    #[error("invalid record in {url}: {reason}")]
    InvalidRecord { url: String, reason: String },

    /// A range-replace batch carried a row outside the year being replaced.
    #[error("row dated {date} does not belong to replaced year {year}")]
    YearMismatch { year: i32, date: NaiveDate },

    /// No registered plugin matches the url.
    #[error("no parser registered for {0}")]
    Unroutable(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

impl Error {
    pub(crate) fn malformed(url: &str, reason: impl std::fmt::Display) -> Self {
        Error::MalformedDocument {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid(url: &str, reason: impl std::fmt::Display) -> Self {
        Error::InvalidRecord {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
