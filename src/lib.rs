//! Parser plugins for periodically fetched market-data documents.
//!
//! Each content family (HTML listing pages, per-stock price history, yearly
//! index CSVs, filing feeds, filing archives) gets one small plugin that
//! conforms to [`parsers::DocumentParser`], so a generic fetch/schedule loop
//! can drive all of them interchangeably:
//!
//! ```text
//! Envelope ──► registry.route() ──► plugin
//!                                     ├─ redownload(now)
//!                                     ├─ is_valid()
//!                                     ├─ related_links()
//!                                     └─ parse(&mut ParseContext)
//!                                           ├─ MarketStore upsert / range-replace
//!                                           └─ context accumulation
//! ```

pub mod config;
pub mod envelope;
pub mod error;
pub mod models;
pub mod parsers;
pub mod repository;
pub mod schema;

pub use envelope::Envelope;
pub use error::{Error, Result};
pub use models::{ArchiveEntry, FilingFeedLink, FilingLinkKind, IndexBar, IndexFamily, Listing, PriceBar, Record};
pub use parsers::registry::ParserRegistry;
pub use parsers::{DocumentParser, ParseContext, ParseResult, ParserFactory};
pub use repository::MarketStore;
