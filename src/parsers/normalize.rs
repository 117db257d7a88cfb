//! Field normalizers shared by the plugins.
//!
//! Numeric and date cells are parsed strictly: the only tolerated
//! non-value is the literal "-" placeholder, which becomes `None`.
//! Anything else that does not parse is a required-field failure and the
//! caller aborts the whole document.

use chrono::NaiveDate;
use scraper::ElementRef;
use url::Url;

use crate::envelope::Envelope;
use crate::error::{Error, Result};

/// Printed by sources in place of a missing price.
pub const PLACEHOLDER: &str = "-";

/// Two-digit years above this belong to the 1900s, the rest to the 2000s.
pub const TWO_DIGIT_YEAR_PIVOT: i32 = 89;

/// Parse a price cell: strip thousands separators; "-" means no value.
pub fn parse_price(raw: &str) -> Result<Option<f64>, String> {
    let raw = raw.trim();
    if raw == PLACEHOLDER {
        return Ok(None);
    }
    let cleaned = raw.replace(',', "");
    cleaned
        .parse::<f64>()
        .map(Some)
        .map_err(|_| format!("not a number: {raw:?}"))
}

/// Parse a volume cell: strip thousands separators; "-" means no value.
pub fn parse_volume(raw: &str) -> Result<Option<i64>, String> {
    let raw = raw.trim();
    if raw == PLACEHOLDER {
        return Ok(None);
    }
    let cleaned = raw.replace(',', "");
    cleaned
        .parse::<i64>()
        .map(Some)
        .map_err(|_| format!("not a volume: {raw:?}"))
}

/// Resolve a two-digit year around [`TWO_DIGIT_YEAR_PIVOT`].
pub fn expand_two_digit_year(yy: i32) -> i32 {
    if yy > TWO_DIGIT_YEAR_PIVOT {
        1900 + yy
    } else {
        2000 + yy
    }
}

/// Parse `MM/DD/YY`, e.g. `01/02/90` → 1990-01-02, `01/02/89` → 2089-01-02.
pub fn parse_us_short_date(raw: &str) -> Result<NaiveDate, String> {
    let raw = raw.trim();
    let invalid = || format!("not an MM/DD/YY date: {raw:?}");

    let mut parts = raw.split('/');
    let (Some(m), Some(d), Some(y), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    if y.len() != 2 {
        return Err(invalid());
    }
    let month = m.parse::<u32>().map_err(|_| invalid())?;
    let day = d.parse::<u32>().map_err(|_| invalid())?;
    let yy = y.parse::<i32>().map_err(|_| invalid())?;

    NaiveDate::from_ymd_opt(expand_two_digit_year(yy), month, day).ok_or_else(invalid)
}

/// Parse `YYYY-MM-DD` or `YYYY/MM/DD`.
pub fn parse_iso_date(raw: &str) -> Result<NaiveDate, String> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y/%m/%d"))
        .map_err(|_| format!("not a date: {raw:?}"))
}

/// Assemble a date from fixed offsets of `YYYY?MM?DD...` text.
///
/// The separators are not uniform across the source (".", "/", or a
/// weekday suffix glued on), so only the digit positions are trusted.
pub fn parse_sliced_date(text: &str) -> Result<NaiveDate, String> {
    let invalid = || format!("not a sliced date: {text:?}");
    let year = text.get(0..4).and_then(|s| s.parse::<i32>().ok()).ok_or_else(invalid)?;
    let month = text.get(5..7).and_then(|s| s.parse::<u32>().ok()).ok_or_else(invalid)?;
    let day = text.get(8..10).and_then(|s| s.parse::<u32>().ok()).ok_or_else(invalid)?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}

/// Text of an element with whitespace collapsed to single spaces.
pub fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text nodes of an element, each trimmed, concatenated without separators.
pub fn joined_text_nodes(el: ElementRef<'_>) -> String {
    el.text().map(str::trim).collect()
}

/// The envelope's url as a base for resolving relative hrefs.
pub fn base_url(envelope: &Envelope) -> Result<Url> {
    Url::parse(&envelope.url).map_err(|e| Error::malformed(&envelope.url, format!("bad url: {e}")))
}

/// Resolve an href against the document url. Unresolvable hrefs and
/// non-http(s) targets (`javascript:`, `mailto:`) are dropped.
pub fn resolve_href(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let resolved = base.join(href).ok()?;
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// Drop repeated links, keeping first occurrences in order.
pub fn dedup_links(links: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    links.into_iter().filter(|l| seen.insert(l.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_price_strips_thousands_separators() {
        assert_eq!(parse_price("2,810.15"), Ok(Some(2810.15)));
        assert_eq!(parse_price(" 38,239.98 "), Ok(Some(38239.98)));
        assert_eq!(parse_price("-"), Ok(None));
        assert!(parse_price("").is_err());
        assert!(parse_price("n/a").is_err());
    }

    #[test]
    fn test_parse_volume() {
        assert_eq!(parse_volume("12,345,600"), Ok(Some(12_345_600)));
        assert_eq!(parse_volume("-"), Ok(None));
        assert!(parse_volume("1.5").is_err());
    }

    #[test]
    fn test_two_digit_year_pivot() {
        assert_eq!(parse_us_short_date("01/02/90"), Ok(date(1990, 1, 2)));
        assert_eq!(parse_us_short_date("01/02/89"), Ok(date(2089, 1, 2)));
        assert_eq!(parse_us_short_date("12/31/99"), Ok(date(1999, 12, 31)));
        assert_eq!(parse_us_short_date("1/3/05"), Ok(date(2005, 1, 3)));
        assert!(parse_us_short_date("01/02/1990").is_err());
        assert!(parse_us_short_date("02/30/90").is_err());
    }

    #[test]
    fn test_parse_iso_date_accepts_both_separators() {
        assert_eq!(parse_iso_date("2024-01-05"), Ok(date(2024, 1, 5)));
        assert_eq!(parse_iso_date("2024/01/05"), Ok(date(2024, 1, 5)));
        assert!(parse_iso_date("05/01/2024").is_err());
    }

    #[test]
    fn test_parse_sliced_date_uses_fixed_offsets() {
        assert_eq!(parse_sliced_date("2019.01.04"), Ok(date(2019, 1, 4)));
        assert_eq!(parse_sliced_date("2019/01/04(金)"), Ok(date(2019, 1, 4)));
        assert!(parse_sliced_date("2019.1.4").is_err());
        assert!(parse_sliced_date("日付").is_err());
    }

    #[test]
    fn test_resolve_href() {
        let base = Url::parse("https://example.com/stocks/list?page=2").unwrap();
        assert_eq!(
            resolve_href(&base, "/stocks/7203").as_deref(),
            Some("https://example.com/stocks/7203")
        );
        assert_eq!(
            resolve_href(&base, "7203?year=2023").as_deref(),
            Some("https://example.com/stocks/7203?year=2023")
        );
        assert_eq!(resolve_href(&base, "#top"), None);
        assert_eq!(resolve_href(&base, "javascript:void(0)"), None);
    }

    #[test]
    fn test_dedup_links_keeps_order() {
        let links = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(dedup_links(links), vec!["b", "a"]);
    }
}
