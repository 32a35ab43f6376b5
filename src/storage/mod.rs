//! Persistence of books, writers and error records
//!
//! SQLite is the production backend; the in-memory backend serves tests and
//! dry runs.

pub mod repository;

pub use repository::{
    BookRepository, MemoryBookRepository, SqliteBookRepository, StorageResult,
};

use std::sync::Arc;

use crate::config::DatabaseConfig;

/// Open the configured SQLite database
pub fn open_repository(config: &DatabaseConfig) -> StorageResult<Arc<dyn BookRepository>> {
    let repo = SqliteBookRepository::new(&config.sqlite_path)?;
    Ok(Arc::new(repo))
}
