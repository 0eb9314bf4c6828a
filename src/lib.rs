//! Reddit ingestion gateway
//!
//! An HTTP service that harvests subreddit listings, user activity,
//! post threads with fully expanded comments, and search results from
//! Reddit, returning a normalized JSON representation. Built to keep
//! collecting against aggressive rate limiting and client
//! fingerprinting:
//! - a proxy-rotating transport with browser-shaped TLS and headers,
//!   retries, and transparent decompression
//! - a bounded, concurrent expansion engine resolving "load more"
//!   comment placeholders into a deduplicated tree
//! - cursor-driven pagination with composite stop conditions

pub mod config;
pub mod parser;
pub mod scraper;
pub mod server;
pub mod transport;
pub mod types;
pub mod upstream;

pub use config::Config;
pub use scraper::{ScrapeService, Scraper};
pub use types::*;
pub use upstream::UpstreamClient;
