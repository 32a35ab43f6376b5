//! novelcrawl - Incremental serialized novel crawler
//!
//! Discovers, tracks and archives novels published across many independent
//! web sources, keeping every metadata revision of a book as a version.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`client`] - Resilient HTTP client: bulkhead, circuit breaker, retry, decoding
//! - [`vendor`] - Per-source URL building and page parsing
//! - [`book`] - Book refresh and download with the version state machine
//! - [`site`] - Site orchestration: explore, update, download, fix, check
//! - [`spider`] - Runs an operation across every configured site
//! - [`models`] - Core data structures and types
//! - [`storage`] - Persistence gateway (SQLite, in-memory)
//! - [`utils`] - Common utilities and domain errors
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use novelcrawl::config::Config;
//! use novelcrawl::spider::{Operation, Spider};
//! use novelcrawl::storage::open_repository;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Path::new("novelcrawl.toml"))?;
//!     let repo = open_repository(&config.database)?;
//!     let spider = Spider::from_config(&config, repo)?;
//!     let outcomes = spider.run(Operation::Explore, None).await?;
//!     println!("{}", serde_json::to_string_pretty(&outcomes)?);
//!     Ok(())
//! }
//! ```

pub mod book;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod site;
pub mod spider;
pub mod storage;
pub mod utils;
pub mod vendor;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::book::{BookService, RefreshOutcome};
    pub use crate::client::ResilientClient;
    pub use crate::config::{Config, SiteConfig};
    pub use crate::error::{CrawlErrorTrait, Error, ErrorCategory, Result};
    pub use crate::models::{Book, BookStatus, Chapter, Summary, Writer};
    pub use crate::site::{CrawlContext, Site};
    pub use crate::spider::{Operation, Spider};
    pub use crate::storage::{BookRepository, MemoryBookRepository, SqliteBookRepository};
    pub use crate::vendor::{SelectorVendor, VendorService};
}
