//! The fetched-document envelope handed to every parser plugin.

use std::borrow::Cow;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use encoding_rs::{Encoding, UTF_8};

use crate::error::{Error, Result};

/// A fetched document plus its request/response metadata.
///
/// Produced by the external fetch layer and immutable once built; plugins
/// only ever borrow it.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub url: String,
    pub request_method: String,
    pub response_headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl Envelope {
    /// Build a GET envelope with no response headers.
    pub fn new(url: impl Into<String>, body: impl Into<Vec<u8>>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            request_method: "GET".to_string(),
            response_headers: HashMap::new(),
            body: body.into(),
            fetched_at,
        }
    }

    /// Attach a response header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.response_headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Look up a response header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get the Content-Type header.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Get the charset parameter of the Content-Type header.
    pub fn charset(&self) -> Option<&str> {
        self.content_type()?.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches('"'))
        })
    }

    /// Decode the body using the declared charset, defaulting to UTF-8.
    ///
    /// Bytes that are not valid in that encoding make the whole document
    /// malformed; nothing is replaced with U+FFFD.
    pub fn text(&self) -> Result<Cow<'_, str>> {
        let encoding = match self.charset() {
            Some(label) => Encoding::for_label(label.as_bytes())
                .ok_or_else(|| Error::malformed(&self.url, format!("unknown charset {label}")))?,
            None => UTF_8,
        };
        encoding
            .decode_without_bom_handling_and_without_replacement(strip_bom(&self.body, encoding))
            .ok_or_else(|| {
                Error::malformed(&self.url, format!("body is not valid {}", encoding.name()))
            })
    }
}

fn strip_bom<'a>(body: &'a [u8], encoding: &'static Encoding) -> &'a [u8] {
    if encoding == UTF_8 {
        body.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(body)
    } else {
        body
    }
}
