//! Filing archives: zip bundles whose member list is recorded per filing.
//!
//! An archive never changes once published, so it is never refetched.

use std::io::Cursor;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, Span};
use zip::ZipArchive;

use super::normalize::base_url;
use super::{freshness, DocumentParser, ParseContext};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::models::{ArchiveEntry, Record};

pub struct FilingArchive<'a> {
    envelope: &'a Envelope,
    span: Span,
    filing_id: String,
    entries: Vec<ArchiveEntry>,
}

impl<'a> FilingArchive<'a> {
    pub fn new(envelope: &'a Envelope, span: Span) -> Result<Self> {
        let url = envelope.url.as_str();
        let filing_id = filing_id_from_url(envelope)?;

        let mut archive =
            ZipArchive::new(Cursor::new(envelope.body.as_slice())).map_err(|e| Error::malformed(url, e))?;

        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let file = archive.by_index_raw(i).map_err(|e| Error::malformed(url, e))?;
            if file.is_dir() {
                continue;
            }
            entries.push(ArchiveEntry {
                filing_id: filing_id.clone(),
                entry_path: file.name().to_string(),
            });
        }

        debug!(parent: &span, url, filing_id = %filing_id, entries = entries.len(), "Listed filing archive");
        Ok(Self {
            envelope,
            span,
            filing_id,
            entries,
        })
    }

    pub fn filing_id(&self) -> &str {
        &self.filing_id
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }
}

/// `https://host/filings/S100ABCD.zip?dl=1` → `S100ABCD`.
fn filing_id_from_url(envelope: &Envelope) -> Result<String> {
    let url = base_url(envelope)?;
    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();

    Path::new(last)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::invalid(&envelope.url, "archive url has no file name"))
}

#[async_trait]
impl<'a> DocumentParser for FilingArchive<'a> {
    fn redownload(&self, _now: DateTime<Utc>) -> bool {
        freshness::immutable()
    }

    fn is_valid(&self) -> bool {
        !self.entries.is_empty()
    }

    fn related_links(&self) -> Option<Vec<String>> {
        self.is_valid().then(Vec::new)
    }

    async fn parse(&self, ctx: &mut ParseContext) -> Result<()> {
        if !self.is_valid() {
            debug!(parent: &self.span, url = %self.envelope.url, "Archive has no files, context untouched");
            return Ok(());
        }
        ctx.append(
            self.filing_id.clone(),
            self.entries.iter().cloned().map(Record::ArchiveEntry).collect(),
        );
        debug!(
            parent: &self.span,
            filing_id = %self.filing_id,
            entries = self.entries.len(),
            "Appended archive entries"
        );
        Ok(())
    }
}

pub fn factory<'a>(envelope: &'a Envelope, span: Span) -> Result<Box<dyn DocumentParser + 'a>> {
    Ok(Box::new(FilingArchive::new(envelope, span)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::setup_test_store;
    use chrono::TimeZone;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_zip(dirs: &[&str], files: &[&str]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for dir in dirs {
            writer.add_directory(*dir, options).unwrap();
        }
        for file in files {
            writer.start_file(*file, options).unwrap();
            writer.write_all(b"<html></html>").unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn envelope(url: &str, body: Vec<u8>) -> Envelope {
        Envelope::new(url, body, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_lists_files_and_skips_directories() {
        let body = build_zip(&["XBRL/", "XBRL/PublicDoc/"], &["XBRL/PublicDoc/0101010.htm", "manifest.xml"]);
        let env = envelope("https://example.com/filings/S100ABCD.zip?dl=1", body);
        let archive = FilingArchive::new(&env, Span::none()).unwrap();

        assert_eq!(archive.filing_id(), "S100ABCD");
        let paths: Vec<_> = archive.entries().iter().map(|e| e.entry_path.as_str()).collect();
        assert_eq!(paths, vec!["XBRL/PublicDoc/0101010.htm", "manifest.xml"]);
        assert!(!archive.redownload(env.fetched_at + chrono::Duration::days(3650)));
    }

    #[test]
    fn test_corrupt_zip_is_malformed() {
        let env = envelope("https://example.com/filings/S100ABCD.zip", b"PK\x03\x04 not really".to_vec());
        assert!(matches!(
            FilingArchive::new(&env, Span::none()),
            Err(Error::MalformedDocument { .. })
        ));
    }

    #[tokio::test]
    async fn test_parse_appends_then_persists_idempotently() {
        let (store, _dir) = setup_test_store().await;
        let body = build_zip(&[], &["a.htm", "b.htm"]);
        let env = envelope("https://example.com/filings/S100ABCD.zip", body);
        let archive = FilingArchive::new(&env, Span::none()).unwrap();
        let mut ctx = ParseContext::new(store.clone());

        archive.parse(&mut ctx).await.unwrap();
        store.persist_context(ctx.records()).await.unwrap();
        store.persist_context(ctx.records()).await.unwrap();

        assert_eq!(store.archive_entries("S100ABCD").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_directory_only_archive_is_invalid() {
        let (store, _dir) = setup_test_store().await;
        let body = build_zip(&["empty/"], &[]);
        let env = envelope("https://example.com/filings/S100ABCD.zip", body);
        let archive = FilingArchive::new(&env, Span::none()).unwrap();
        let mut ctx = ParseContext::new(store);

        archive.parse(&mut ctx).await.unwrap();
        assert!(!archive.is_valid());
        assert_eq!(archive.related_links(), None);
        assert!(ctx.records().is_empty());
    }
}
