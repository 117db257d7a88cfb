//! Url routing: an ordered table of (pattern, factory) pairs.
//!
//! The first pattern matching an envelope's url decides its plugin, so more
//! specific patterns must be registered before general ones.

use regex::Regex;
use tracing::{debug, Span};

use super::{
    filing_archive, filing_feed, index_csv, market_listings, nikkei_monthly, stock_history, stock_list,
    year_links, DocumentParser, ParserFactory,
};
use crate::envelope::Envelope;
use crate::error::{Error, Result};

/// Url patterns for the built-in families, most specific first.
const DEFAULT_ROUTES: &[(&str, ParserFactory)] = &[
    (r"/indices/nikkei/archive/\d{4}/\d{2}/?(?:[?#].*)?$", nikkei_monthly::factory),
    (r"/indices/nikkei/archive/?(?:[?#].*)?$", year_links::factory),
    (r"/indices/topix/[^/?#]*\.csv(?:[?#].*)?$", index_csv::topix_factory),
    (r"/indices/dow/[^/?#]*\.csv(?:[?#].*)?$", index_csv::dow_factory),
    (r"/stocks/[0-9A-Z]{4,5}(?:/history)?/?(?:[?#].*)?$", stock_history::factory),
    (r"/stocks/?(?:[?#].*)?$", stock_list::factory),
    (r"/markets/[a-z-]+/listed/?(?:[?#].*)?$", market_listings::factory),
    (r"/filings/feed(?:\.atom|\.xml)?(?:[?#].*)?$", filing_feed::factory),
    (r"/filings/[^/?#]+\.zip(?:[?#].*)?$", filing_archive::factory),
];

#[derive(Default)]
pub struct ParserRegistry {
    routes: Vec<(Regex, ParserFactory)>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in content families.
    pub fn default_routes() -> Self {
        let mut registry = Self::new();
        for (pattern, factory) in DEFAULT_ROUTES {
            registry
                .register(pattern, *factory)
                .expect("built-in route patterns are valid");
        }
        registry
    }

    /// Append a route. Routes added later only see urls no earlier route
    /// claimed.
    pub fn register(&mut self, pattern: &str, factory: ParserFactory) -> Result<&mut Self, regex::Error> {
        self.routes.push((Regex::new(pattern)?, factory));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// The factory of the first route matching `url`.
    pub fn factory_for(&self, url: &str) -> Option<ParserFactory> {
        self.routes
            .iter()
            .find(|(pattern, _)| pattern.is_match(url))
            .map(|(_, factory)| *factory)
    }

    /// Build the plugin for an envelope.
    pub fn route<'a>(&self, envelope: &'a Envelope, span: Span) -> Result<Box<dyn DocumentParser + 'a>> {
        let Some(factory) = self.factory_for(&envelope.url) else {
            debug!(parent: &span, url = %envelope.url, "No parser route matched");
            return Err(Error::Unroutable(envelope.url.clone()));
        };
        factory(envelope, span)
    }
}
