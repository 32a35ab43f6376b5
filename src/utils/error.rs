//! Error types for the novelcrawl engine
//!
//! This module defines the per-domain error types used throughout the crawler.
//! The crate-level [`crate::error::Error`] wraps all of them.

use thiserror::Error;

/// Errors that can occur while fetching a page from a source
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport level failure (connection refused, reset, DNS, ...)
    #[error("network failure: {0}")]
    Network(#[source] reqwest::Error),

    /// Request timeout
    #[error("request timeout")]
    Timeout,

    /// Non-2xx response
    #[error("unexpected status code {0}")]
    Status(u16),

    /// The server answered 2xx with an empty body
    #[error("response body is empty")]
    EmptyBody,

    /// Body could not be decoded with the source's declared encoding
    #[error("decode failure: {0}")]
    Decode(String),

    /// Invalid URL
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The crawl was cancelled before the request was admitted
    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether the failure belongs to the "service unavailable / bad gateway" class
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Status(502 | 503))
    }

    /// Whether repeating the request could succeed
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::InvalidUrl(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_builder() {
            Self::InvalidUrl(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Network(err)
        }
    }
}

/// Errors raised by a vendor parser when source markup does not match
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A required field was not found on the page
    #[error("{0} not found")]
    FieldNotFound(&'static str),

    /// The source reports that the book does not exist
    #[error("book not found")]
    BookNotFound,

    /// Chapter list page has no chapters
    #[error("chapter list is empty")]
    EmptyChapterList,

    /// Chapter page has no content
    #[error("chapter content not found")]
    ChapterContentNotFound,

    /// The page does not carry the source's availability marker
    #[error("page is not available")]
    PageUnavailable,

    /// Unknown or unsupported format
    #[error("unknown or unsupported format: {0}")]
    UnknownFormat(String),
}

/// Errors raised by the persistence gateway
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLite failure
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A row with the same (site, id, version) already exists
    #[error("book {site}-{id} version {version} already exists")]
    DuplicateBook { site: String, id: i64, version: i64 },

    /// The row to update does not exist
    #[error("book {site}-{id} version {version} not found")]
    BookNotFound { site: String, id: i64, version: i64 },

    /// A value read from the database could not be interpreted
    #[error("corrupted record: {0}")]
    Corrupted(String),

    /// Backup or schema I/O failure
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backup serialization failure
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Internal lock poisoned by a panicking thread
    #[error("storage lock poisoned")]
    LockPoisoned,
}

/// Errors raised by book level operations (refresh, download)
#[derive(Error, Debug)]
pub enum BookError {
    /// Fetching a page failed
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Parsing a page failed
    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),

    /// Persisting the outcome failed
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),

    /// Book is not in a state that allows the operation
    #[error("book is not ready for download (status {status}, downloaded {downloaded})")]
    NotReady { status: String, downloaded: bool },

    /// Too many chapters failed during a download
    #[error("{failed} chapters failed, limit is {limit}")]
    TooManyChapterErrors { failed: usize, limit: usize },

    /// Writing the book file failed
    #[error("write book file failed: {0}")]
    Io(#[from] std::io::Error),
}

impl BookError {
    /// Whether the failure came from the network or source markup rather than local state
    pub fn is_source_failure(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::Parse(_))
    }
}
