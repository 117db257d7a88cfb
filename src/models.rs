//! Domain records extracted from market-data documents.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A listed stock. Unique per symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub symbol: String,
    pub name: String,
    pub market: String,
}

/// One daily bar of a stock's price history. Unique per (symbol, date).
///
/// Price fields are `None` when the source printed a "-" placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<i64>,
    pub adjusted_close: Option<f64>,
}

/// One daily bar of a market index. Unique per date within its family's table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexBar {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
}

/// Which index an [`IndexBar`] belongs to. Each family has its own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexFamily {
    Nikkei,
    Topix,
    Dow,
}

impl IndexFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nikkei => "nikkei",
            Self::Topix => "topix",
            Self::Dow => "dow",
        }
    }
}

/// What a filing feed link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilingLinkKind {
    Archive,
    Pdf,
    Html,
    Other,
}

impl FilingLinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::Pdf => "pdf",
            Self::Html => "html",
            Self::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "archive" => Some(Self::Archive),
            "pdf" => Some(Self::Pdf),
            "html" => Some(Self::Html),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Classify a link by its declared MIME type, falling back to the href
    /// extension when the type is missing or unrecognized.
    pub fn classify(mime_type: Option<&str>, href: &str) -> Self {
        let by_type = mime_type.map(|t| t.split(';').next().unwrap_or(t).trim().to_ascii_lowercase());
        match by_type.as_deref() {
            Some("application/zip") | Some("application/x-zip-compressed") => return Self::Archive,
            Some("application/pdf") => return Self::Pdf,
            Some("text/html") | Some("application/xhtml+xml") => return Self::Html,
            _ => {}
        }

        let path = href.split(['?', '#']).next().unwrap_or(href).to_ascii_lowercase();
        if path.ends_with(".zip") {
            Self::Archive
        } else if path.ends_with(".pdf") {
            Self::Pdf
        } else if path.ends_with(".html") || path.ends_with(".htm") {
            Self::Html
        } else {
            Self::Other
        }
    }
}

/// A link published in a filing feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingFeedLink {
    pub feed_id: String,
    pub href: String,
    pub kind: FilingLinkKind,
}

/// A file inside a filing archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub filing_id: String,
    pub entry_path: String,
}

/// Any record a plugin can extract, used by both the direct-write and the
/// context-accumulating plugins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Listing(Listing),
    PriceBar(PriceBar),
    IndexBar { family: IndexFamily, bar: IndexBar },
    FilingFeedLink(FilingFeedLink),
    ArchiveEntry(ArchiveEntry),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_prefers_mime_type() {
        assert_eq!(
            FilingLinkKind::classify(Some("application/zip"), "https://x/doc"),
            FilingLinkKind::Archive
        );
        assert_eq!(
            FilingLinkKind::classify(Some("application/pdf; name=a.pdf"), "https://x/a.zip"),
            FilingLinkKind::Pdf
        );
    }

    #[test]
    fn test_classify_falls_back_to_extension() {
        assert_eq!(
            FilingLinkKind::classify(None, "https://x/S100ABCD.ZIP?dl=1"),
            FilingLinkKind::Archive
        );
        assert_eq!(
            FilingLinkKind::classify(Some("application/octet-stream"), "/doc/index.htm"),
            FilingLinkKind::Html
        );
        assert_eq!(FilingLinkKind::classify(None, "/feed"), FilingLinkKind::Other);
    }

    #[test]
    fn test_link_kind_round_trips_through_str() {
        for kind in [
            FilingLinkKind::Archive,
            FilingLinkKind::Pdf,
            FilingLinkKind::Html,
            FilingLinkKind::Other,
        ] {
            assert_eq!(FilingLinkKind::from_str(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_record_serializes_with_kind_tag() {
        let record = Record::ArchiveEntry(ArchiveEntry {
            filing_id: "S100ABCD".to_string(),
            entry_path: "XBRL/PublicDoc/a.htm".to_string(),
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "archive_entry");
        assert_eq!(json["filing_id"], "S100ABCD");
    }
}
