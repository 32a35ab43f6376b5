//! Repository Pattern for Book Persistence
//!
//! This module provides the trait-based persistence gateway used by the
//! crawl engine, enabling:
//! - Easy testing with the in-memory implementation
//! - Swappable storage backends
//! - Clear separation between crawl algorithms and SQL
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Site / BookService                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    BookRepository                           │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                     │
//!                    ▼                     ▼
//!          ┌─────────────────┐   ┌─────────────────┐
//!          │     SQLite      │   │     Memory      │
//!          └─────────────────┘   └─────────────────┘
//! ```
//!
//! Derived queries (latest versions, summary, duplicates) have default
//! implementations on top of the primitive ones; the SQLite backend
//! overrides the hot ones with SQL.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::models::{Book, BookStatus, ErrorRecord, StatusCount, Summary, Writer};
use crate::utils::error::StorageError;
use crate::vendor::missing_ids;

/// Result type of repository operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ============================================================================
// Repository Trait
// ============================================================================

/// Persistence gateway for books, writers and error records
///
/// Every query is scoped to one site.
pub trait BookRepository: Send + Sync {
    /// Insert a new `(site, id, version)` row, creating the writer if needed
    fn create_book(&self, book: &Book) -> StorageResult<()>;

    /// Overwrite the row identified by `(site, id, version)`
    fn update_book(&self, book: &Book) -> StorageResult<()>;

    /// Remove one row; returns whether it existed
    fn delete_book(&self, site: &str, id: i64, version: i64) -> StorageResult<bool>;

    /// Exact version lookup
    fn find_book_version(&self, site: &str, id: i64, version: i64) -> StorageResult<Option<Book>>;

    /// Every row of a site, ordered by id then version
    fn find_all_books(&self, site: &str) -> StorageResult<Vec<Book>>;

    /// Look up a writer by name, creating it on first reference
    fn save_writer(&self, name: &str) -> StorageResult<Writer>;

    /// Number of writers
    fn count_writers(&self) -> StorageResult<usize>;

    /// Insert or replace the error record of a book
    fn save_error(&self, site: &str, id: i64, error: &str) -> StorageResult<()>;

    /// Remove the error record of a book; returns whether it existed
    fn delete_error(&self, site: &str, id: i64) -> StorageResult<bool>;

    /// Error records of a site ordered by id
    fn find_errors(&self, site: &str) -> StorageResult<Vec<ErrorRecord>>;

    /// Write a full copy of the store to `dir/file`
    fn backup(&self, dir: &Path, file: &str) -> StorageResult<PathBuf>;

    /// Highest version of an id
    fn find_book(&self, site: &str, id: i64) -> StorageResult<Option<Book>> {
        Ok(self
            .find_all_books(site)?
            .into_iter()
            .filter(|book| book.id == id)
            .max_by_key(|book| book.version))
    }

    /// Error record of one book
    fn find_error(&self, site: &str, id: i64) -> StorageResult<Option<ErrorRecord>> {
        Ok(self.find_errors(site)?.into_iter().find(|e| e.id == id))
    }

    /// Highest version of every id, ordered by id
    fn find_latest_books(&self, site: &str) -> StorageResult<Vec<Book>> {
        let mut latest: BTreeMap<i64, Book> = BTreeMap::new();
        for book in self.find_all_books(site)? {
            match latest.get(&book.id) {
                Some(current) if current.version >= book.version => {}
                _ => {
                    latest.insert(book.id, book);
                }
            }
        }
        Ok(latest.into_values().collect())
    }

    /// Latest versions ordered by update date, newest first
    fn find_books_for_update(&self, site: &str) -> StorageResult<Vec<Book>> {
        let mut books = self.find_latest_books(site)?;
        books.sort_by(|a, b| b.update_date.cmp(&a.update_date).then(a.id.cmp(&b.id)));
        Ok(books)
    }

    /// Latest versions that are finished but not downloaded
    fn find_books_for_download(&self, site: &str) -> StorageResult<Vec<Book>> {
        Ok(self
            .find_latest_books(site)?
            .into_iter()
            .filter(|book| book.status == BookStatus::End && !book.is_downloaded)
            .collect())
    }

    /// Distinct ids known from books and error records
    fn find_ids(&self, site: &str) -> StorageResult<Vec<i64>> {
        let mut ids: BTreeSet<i64> = self.find_all_books(site)?.iter().map(|b| b.id).collect();
        ids.extend(self.find_errors(site)?.iter().map(|e| e.id));
        Ok(ids.into_iter().collect())
    }

    /// Ids absent from the store below the maximum known id
    fn find_missing_ids(&self, site: &str) -> StorageResult<Vec<i64>> {
        Ok(missing_ids(&self.find_ids(site)?))
    }

    /// Rows identical to the previous version of the same id
    fn find_duplicate_books(&self, site: &str) -> StorageResult<Vec<Book>> {
        let books = self.find_all_books(site)?;
        Ok(books
            .windows(2)
            .filter(|pair| pair[0].id == pair[1].id && same_snapshot(&pair[0], &pair[1]))
            .map(|pair| pair[1].clone())
            .collect())
    }

    /// Remove rows returned by [`BookRepository::find_duplicate_books`]
    fn delete_duplicate_books(&self, site: &str) -> StorageResult<usize> {
        let mut deleted = 0;
        for book in self.find_duplicate_books(site)? {
            if self.delete_book(site, book.id, book.version)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Error records whose book's latest version parsed successfully
    fn find_orphan_errors(&self, site: &str) -> StorageResult<Vec<ErrorRecord>> {
        let parsed: BTreeSet<i64> = self
            .find_latest_books(site)?
            .into_iter()
            .filter(|book| book.status != BookStatus::Error)
            .map(|book| book.id)
            .collect();

        Ok(self
            .find_errors(site)?
            .into_iter()
            .filter(|record| parsed.contains(&record.id))
            .collect())
    }

    /// Error records of ids with no book row at all
    fn find_errors_without_book(&self, site: &str) -> StorageResult<Vec<ErrorRecord>> {
        let known: BTreeSet<i64> = self.find_all_books(site)?.iter().map(|b| b.id).collect();

        Ok(self
            .find_errors(site)?
            .into_iter()
            .filter(|record| !known.contains(&record.id))
            .collect())
    }

    /// Derived statistics of a site
    fn summary(&self, site: &str) -> StorageResult<Summary> {
        let all = self.find_all_books(site)?;
        let latest = self.find_latest_books(site)?;
        let errors = self.find_errors(site)?;

        let mut status_count = StatusCount::default();
        for book in &latest {
            status_count.record(book.status);
        }

        let max_id = all
            .iter()
            .map(|b| b.id)
            .chain(errors.iter().map(|e| e.id))
            .max()
            .unwrap_or(0);

        let latest_success_id = latest
            .iter()
            .filter(|b| b.status != BookStatus::Error)
            .map(|b| b.id)
            .max()
            .unwrap_or(0);

        Ok(Summary {
            book_count: latest.len(),
            record_count: all.len(),
            error_count: errors.len(),
            writer_count: self.count_writers()?,
            status_count,
            max_id,
            latest_success_id,
        })
    }
}

/// Whether two rows carry the same metadata
fn same_snapshot(a: &Book, b: &Book) -> bool {
    a.title == b.title
        && a.writer.name == b.writer.name
        && a.book_type == b.book_type
        && a.update_date == b.update_date
        && a.update_chapter == b.update_chapter
}

// ============================================================================
// SQLite Implementation
// ============================================================================

impl ToSql for BookStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for BookStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

const BOOK_COLUMNS: &str = "b.site, b.id, b.version, b.title, w.id, w.name, b.type, \
                            b.update_date, b.update_chapter, b.status, b.is_downloaded";

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        site: row.get(0)?,
        id: row.get(1)?,
        version: row.get(2)?,
        title: row.get(3)?,
        writer: Writer {
            id: row.get(4)?,
            name: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        },
        book_type: row.get(6)?,
        update_date: row.get(7)?,
        update_chapter: row.get(8)?,
        status: row.get(9)?,
        is_downloaded: row.get(10)?,
        error: None,
    })
}

/// SQLite implementation of BookRepository
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqliteBookRepository {
    conn: Mutex<Connection>,
}

impl SqliteBookRepository {
    /// Open (or create) a database file
    pub fn new(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite repository initialized");
        Ok(repo)
    }

    /// Create in-memory repository (for testing)
    pub fn in_memory() -> StorageResult<Self> {
        let repo = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        repo.create_schema()?;
        Ok(repo)
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn create_schema(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS writers (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE
                );

                CREATE TABLE IF NOT EXISTS books (
                    site TEXT NOT NULL,
                    id INTEGER NOT NULL,
                    version INTEGER NOT NULL,
                    title TEXT NOT NULL DEFAULT '',
                    writer_id INTEGER REFERENCES writers(id),
                    type TEXT NOT NULL DEFAULT '',
                    update_date TEXT NOT NULL DEFAULT '',
                    update_chapter TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL,
                    is_downloaded INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (site, id, version)
                );

                CREATE INDEX IF NOT EXISTS idx_books_status
                    ON books(site, status);

                CREATE INDEX IF NOT EXISTS idx_books_update_date
                    ON books(site, update_date);

                CREATE TABLE IF NOT EXISTS errors (
                    site TEXT NOT NULL,
                    id INTEGER NOT NULL,
                    data TEXT NOT NULL,
                    PRIMARY KEY (site, id)
                );
                "#,
        )?;

        Ok(())
    }

    fn writer_id(conn: &Connection, name: &str) -> StorageResult<Option<i64>> {
        if name.is_empty() {
            return Ok(None);
        }

        conn.execute(
            "INSERT OR IGNORE INTO writers (name) VALUES (?1)",
            params![name],
        )?;
        let id = conn.query_row(
            "SELECT id FROM writers WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        Ok(Some(id))
    }

    fn query_books(
        &self,
        filter: &str,
        params: &[&dyn ToSql],
    ) -> StorageResult<Vec<Book>> {
        let conn = self.lock()?;
        let query = format!(
            "SELECT {BOOK_COLUMNS} FROM books b LEFT JOIN writers w ON b.writer_id = w.id {filter}"
        );

        let mut stmt = conn.prepare(&query)?;
        let books = stmt
            .query_map(params, book_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(books)
    }
}

impl BookRepository for SqliteBookRepository {
    fn create_book(&self, book: &Book) -> StorageResult<()> {
        let conn = self.lock()?;
        let writer_id = Self::writer_id(&conn, &book.writer.name)?;

        let inserted = conn.execute(
            r#"
                INSERT OR IGNORE INTO books
                    (site, id, version, title, writer_id, type, update_date, update_chapter, status, is_downloaded)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            params![
                book.site,
                book.id,
                book.version,
                book.title,
                writer_id,
                book.book_type,
                book.update_date,
                book.update_chapter,
                book.status,
                book.is_downloaded,
            ],
        )?;

        if inserted == 0 {
            return Err(StorageError::DuplicateBook {
                site: book.site.clone(),
                id: book.id,
                version: book.version,
            });
        }

        Ok(())
    }

    fn update_book(&self, book: &Book) -> StorageResult<()> {
        let conn = self.lock()?;
        let writer_id = Self::writer_id(&conn, &book.writer.name)?;

        let updated = conn.execute(
            r#"
                UPDATE books SET
                    title = ?4, writer_id = ?5, type = ?6, update_date = ?7,
                    update_chapter = ?8, status = ?9, is_downloaded = ?10
                WHERE site = ?1 AND id = ?2 AND version = ?3
                "#,
            params![
                book.site,
                book.id,
                book.version,
                book.title,
                writer_id,
                book.book_type,
                book.update_date,
                book.update_chapter,
                book.status,
                book.is_downloaded,
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::BookNotFound {
                site: book.site.clone(),
                id: book.id,
                version: book.version,
            });
        }

        Ok(())
    }

    fn delete_book(&self, site: &str, id: i64, version: i64) -> StorageResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM books WHERE site = ?1 AND id = ?2 AND version = ?3",
            params![site, id, version],
        )?;
        Ok(deleted > 0)
    }

    fn find_book_version(&self, site: &str, id: i64, version: i64) -> StorageResult<Option<Book>> {
        let conn = self.lock()?;
        let query = format!(
            "SELECT {BOOK_COLUMNS} FROM books b LEFT JOIN writers w ON b.writer_id = w.id \
             WHERE b.site = ?1 AND b.id = ?2 AND b.version = ?3"
        );
        let book = conn
            .query_row(&query, params![site, id, version], book_from_row)
            .optional()?;
        Ok(book)
    }

    fn find_book(&self, site: &str, id: i64) -> StorageResult<Option<Book>> {
        let conn = self.lock()?;
        let query = format!(
            "SELECT {BOOK_COLUMNS} FROM books b LEFT JOIN writers w ON b.writer_id = w.id \
             WHERE b.site = ?1 AND b.id = ?2 ORDER BY b.version DESC LIMIT 1"
        );
        let book = conn
            .query_row(&query, params![site, id], book_from_row)
            .optional()?;
        Ok(book)
    }

    fn find_all_books(&self, site: &str) -> StorageResult<Vec<Book>> {
        self.query_books("WHERE b.site = ?1 ORDER BY b.id, b.version", &[&site])
    }

    fn find_latest_books(&self, site: &str) -> StorageResult<Vec<Book>> {
        self.query_books(
            "WHERE b.site = ?1 AND b.version = \
                (SELECT MAX(version) FROM books m WHERE m.site = b.site AND m.id = b.id) \
             ORDER BY b.id",
            &[&site],
        )
    }

    fn save_writer(&self, name: &str) -> StorageResult<Writer> {
        let conn = self.lock()?;
        let id = Self::writer_id(&conn, name)?;
        Ok(Writer {
            id,
            name: name.to_string(),
        })
    }

    fn count_writers(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM writers", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn save_error(&self, site: &str, id: i64, error: &str) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO errors (site, id, data) VALUES (?1, ?2, ?3)",
            params![site, id, error],
        )?;
        Ok(())
    }

    fn delete_error(&self, site: &str, id: i64) -> StorageResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM errors WHERE site = ?1 AND id = ?2",
            params![site, id],
        )?;
        Ok(deleted > 0)
    }

    fn find_errors(&self, site: &str) -> StorageResult<Vec<ErrorRecord>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT site, id, data FROM errors WHERE site = ?1 ORDER BY id")?;
        let errors = stmt
            .query_map(params![site], |row| {
                Ok(ErrorRecord {
                    site: row.get(0)?,
                    id: row.get(1)?,
                    error: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(errors)
    }

    fn find_error(&self, site: &str, id: i64) -> StorageResult<Option<ErrorRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT site, id, data FROM errors WHERE site = ?1 AND id = ?2",
                params![site, id],
                |row| {
                    Ok(ErrorRecord {
                        site: row.get(0)?,
                        id: row.get(1)?,
                        error: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn backup(&self, dir: &Path, file: &str) -> StorageResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(file);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let conn = self.lock()?;
        conn.execute("VACUUM INTO ?1", params![path.to_string_lossy().into_owned()])?;

        tracing::info!(path = %path.display(), "SQLite backup written");
        Ok(path)
    }
}

// ============================================================================
// In-Memory Implementation
// ============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    books: BTreeMap<String, BTreeMap<(i64, i64), Book>>,
    writers: HashMap<String, i64>,
    errors: BTreeMap<String, BTreeMap<i64, String>>,
}

/// Snapshot written by [`MemoryBookRepository::backup`]
#[derive(Debug, Serialize, Deserialize)]
struct MemoryDump {
    books: Vec<Book>,
    writers: Vec<Writer>,
    errors: Vec<ErrorRecord>,
}

/// In-memory implementation of BookRepository for tests and dry runs
#[derive(Default)]
pub struct MemoryBookRepository {
    state: RwLock<MemoryState>,
}

impl MemoryBookRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve_writer(state: &mut MemoryState, name: &str) -> Writer {
        if name.is_empty() {
            return Writer::default();
        }
        let next_id = state.writers.len() as i64 + 1;
        let id = *state.writers.entry(name.to_string()).or_insert(next_id);
        Writer {
            id: Some(id),
            name: name.to_string(),
        }
    }
}

impl BookRepository for MemoryBookRepository {
    fn create_book(&self, book: &Book) -> StorageResult<()> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        let writer = Self::resolve_writer(&mut state, &book.writer.name);

        let rows = state.books.entry(book.site.clone()).or_default();
        if rows.contains_key(&(book.id, book.version)) {
            return Err(StorageError::DuplicateBook {
                site: book.site.clone(),
                id: book.id,
                version: book.version,
            });
        }

        rows.insert(
            (book.id, book.version),
            Book {
                writer,
                error: None,
                ..book.clone()
            },
        );
        Ok(())
    }

    fn update_book(&self, book: &Book) -> StorageResult<()> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        let writer = Self::resolve_writer(&mut state, &book.writer.name);

        let row = state
            .books
            .get_mut(&book.site)
            .and_then(|rows| rows.get_mut(&(book.id, book.version)))
            .ok_or_else(|| StorageError::BookNotFound {
                site: book.site.clone(),
                id: book.id,
                version: book.version,
            })?;

        *row = Book {
            writer,
            error: None,
            ..book.clone()
        };
        Ok(())
    }

    fn delete_book(&self, site: &str, id: i64, version: i64) -> StorageResult<bool> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state
            .books
            .get_mut(site)
            .and_then(|rows| rows.remove(&(id, version)))
            .is_some())
    }

    fn find_book_version(&self, site: &str, id: i64, version: i64) -> StorageResult<Option<Book>> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state
            .books
            .get(site)
            .and_then(|rows| rows.get(&(id, version)))
            .cloned())
    }

    fn find_all_books(&self, site: &str) -> StorageResult<Vec<Book>> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state
            .books
            .get(site)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn save_writer(&self, name: &str) -> StorageResult<Writer> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(Self::resolve_writer(&mut state, name))
    }

    fn count_writers(&self) -> StorageResult<usize> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state.writers.len())
    }

    fn save_error(&self, site: &str, id: i64, error: &str) -> StorageResult<()> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        state
            .errors
            .entry(site.to_string())
            .or_default()
            .insert(id, error.to_string());
        Ok(())
    }

    fn delete_error(&self, site: &str, id: i64) -> StorageResult<bool> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state
            .errors
            .get_mut(site)
            .and_then(|errors| errors.remove(&id))
            .is_some())
    }

    fn find_errors(&self, site: &str) -> StorageResult<Vec<ErrorRecord>> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state
            .errors
            .get(site)
            .map(|errors| {
                errors
                    .iter()
                    .map(|(id, error)| ErrorRecord {
                        site: site.to_string(),
                        id: *id,
                        error: error.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn backup(&self, dir: &Path, file: &str) -> StorageResult<PathBuf> {
        let dump = {
            let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
            MemoryDump {
                books: state.books.values().flat_map(|rows| rows.values().cloned()).collect(),
                writers: state
                    .writers
                    .iter()
                    .map(|(name, id)| Writer {
                        id: Some(*id),
                        name: name.clone(),
                    })
                    .collect(),
                errors: state
                    .errors
                    .iter()
                    .flat_map(|(site, errors)| {
                        errors.iter().map(move |(id, error)| ErrorRecord {
                            site: site.clone(),
                            id: *id,
                            error: error.clone(),
                        })
                    })
                    .collect(),
            }
        };

        std::fs::create_dir_all(dir)?;
        let path = dir.join(file);
        std::fs::write(&path, serde_json::to_vec_pretty(&dump)?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = "test";

    fn create_test_repos() -> Vec<Box<dyn BookRepository>> {
        vec![
            Box::new(SqliteBookRepository::in_memory().unwrap()),
            Box::new(MemoryBookRepository::new()),
        ]
    }

    fn book(id: i64, version: i64, title: &str, status: BookStatus) -> Book {
        Book {
            version,
            title: title.to_string(),
            writer: Writer::new("writer"),
            book_type: String::from("fantasy"),
            update_date: String::from("2026-01-01"),
            update_chapter: String::from("chapter"),
            status,
            is_downloaded: status == BookStatus::Download,
            ..Book::new(SITE, id)
        }
    }

    #[test]
    fn test_create_and_find() {
        for repo in create_test_repos() {
            repo.create_book(&book(1, 0, "title", BookStatus::InProgress))
                .unwrap();

            let found = repo.find_book(SITE, 1).unwrap().unwrap();
            assert_eq!(found.title, "title");
            assert_eq!(found.writer.name, "writer");
            assert!(found.writer.id.is_some());
            assert_eq!(found.status, BookStatus::InProgress);

            assert!(repo.find_book(SITE, 2).unwrap().is_none());
            assert!(repo.find_book("other", 1).unwrap().is_none());
        }
    }

    #[test]
    fn test_duplicate_version_rejected() {
        for repo in create_test_repos() {
            let first = book(1, 0, "title", BookStatus::InProgress);
            repo.create_book(&first).unwrap();
            assert!(matches!(
                repo.create_book(&first),
                Err(StorageError::DuplicateBook { .. })
            ));
        }
    }

    #[test]
    fn test_find_book_returns_highest_version() {
        for repo in create_test_repos() {
            repo.create_book(&book(1, 0, "A", BookStatus::InProgress))
                .unwrap();
            repo.create_book(&book(1, 1_700_000_000, "B", BookStatus::InProgress))
                .unwrap();

            let found = repo.find_book(SITE, 1).unwrap().unwrap();
            assert_eq!(found.title, "B");

            let first = repo.find_book_version(SITE, 1, 0).unwrap().unwrap();
            assert_eq!(first.title, "A");

            let latest = repo.find_latest_books(SITE).unwrap();
            assert_eq!(latest.len(), 1);
            assert_eq!(latest[0].version, 1_700_000_000);
        }
    }

    #[test]
    fn test_update_missing_book() {
        for repo in create_test_repos() {
            let result = repo.update_book(&book(9, 0, "title", BookStatus::End));
            assert!(matches!(result, Err(StorageError::BookNotFound { .. })));
        }
    }

    #[test]
    fn test_writer_is_unique_by_name() {
        for repo in create_test_repos() {
            let a = repo.save_writer("someone").unwrap();
            let b = repo.save_writer("someone").unwrap();
            assert_eq!(a.id, b.id);
            assert_eq!(repo.count_writers().unwrap(), 1);
        }
    }

    #[test]
    fn test_error_records() {
        for repo in create_test_repos() {
            repo.save_error(SITE, 3, "timeout").unwrap();
            repo.save_error(SITE, 3, "status 404").unwrap();
            repo.save_error(SITE, 1, "timeout").unwrap();

            let errors = repo.find_errors(SITE).unwrap();
            assert_eq!(errors.len(), 2);
            assert_eq!(errors[0].id, 1);
            assert_eq!(repo.find_error(SITE, 3).unwrap().unwrap().error, "status 404");

            assert!(repo.delete_error(SITE, 3).unwrap());
            assert!(!repo.delete_error(SITE, 3).unwrap());
            assert!(repo.find_error(SITE, 3).unwrap().is_none());
        }
    }

    #[test]
    fn test_summary() {
        for repo in create_test_repos() {
            let statuses = [
                BookStatus::Download,
                BookStatus::InProgress,
                BookStatus::End,
                BookStatus::Error,
                BookStatus::Error,
            ];
            for (i, status) in statuses.into_iter().enumerate() {
                repo.create_book(&book(i as i64 + 1, 0, "title", status))
                    .unwrap();
            }
            repo.save_error(SITE, 4, "timeout").unwrap();
            repo.save_error(SITE, 5, "timeout").unwrap();

            let summary = repo.summary(SITE).unwrap();
            assert_eq!(summary.book_count, 5);
            assert_eq!(summary.record_count, 5);
            assert_eq!(summary.error_count, 2);
            assert_eq!(summary.writer_count, 1);
            assert_eq!(summary.status_count.error, 2);
            assert_eq!(summary.status_count.end, 1);
            assert_eq!(summary.status_count.in_progress, 1);
            assert_eq!(summary.status_count.download, 1);
            assert_eq!(summary.max_id, 5);
            assert_eq!(summary.latest_success_id, 3);
        }
    }

    #[test]
    fn test_books_for_update_and_download() {
        for repo in create_test_repos() {
            let mut old = book(1, 0, "old", BookStatus::End);
            old.update_date = String::from("2020-01-01");
            let mut new = book(2, 0, "new", BookStatus::InProgress);
            new.update_date = String::from("2026-01-01");
            let done = book(3, 0, "done", BookStatus::Download);

            repo.create_book(&old).unwrap();
            repo.create_book(&new).unwrap();
            repo.create_book(&done).unwrap();

            let ids: Vec<i64> = repo
                .find_books_for_update(SITE)
                .unwrap()
                .iter()
                .map(|b| b.id)
                .collect();
            assert_eq!(ids[0], 2);
            assert_eq!(*ids.last().unwrap(), 1);

            let download = repo.find_books_for_download(SITE).unwrap();
            assert_eq!(download.len(), 1);
            assert_eq!(download[0].id, 1);
        }
    }

    #[test]
    fn test_missing_ids() {
        for repo in create_test_repos() {
            repo.create_book(&book(1, 0, "a", BookStatus::End)).unwrap();
            repo.create_book(&book(4, 0, "b", BookStatus::End)).unwrap();
            repo.save_error(SITE, 6, "timeout").unwrap();

            assert_eq!(repo.find_ids(SITE).unwrap(), vec![1, 4, 6]);
            assert_eq!(repo.find_missing_ids(SITE).unwrap(), vec![2, 3, 5]);
        }
    }

    #[test]
    fn test_duplicate_books() {
        for repo in create_test_repos() {
            repo.create_book(&book(1, 0, "A", BookStatus::InProgress))
                .unwrap();
            repo.create_book(&book(1, 10, "A", BookStatus::InProgress))
                .unwrap();
            repo.create_book(&book(1, 20, "B", BookStatus::InProgress))
                .unwrap();

            let duplicates = repo.find_duplicate_books(SITE).unwrap();
            assert_eq!(duplicates.len(), 1);
            assert_eq!(duplicates[0].version, 10);

            assert_eq!(repo.delete_duplicate_books(SITE).unwrap(), 1);
            assert_eq!(repo.find_all_books(SITE).unwrap().len(), 2);
            assert!(repo.find_duplicate_books(SITE).unwrap().is_empty());
        }
    }

    #[test]
    fn test_orphan_errors() {
        for repo in create_test_repos() {
            repo.create_book(&book(1, 0, "A", BookStatus::InProgress))
                .unwrap();
            repo.create_book(&book(2, 0, "", BookStatus::Error)).unwrap();
            repo.save_error(SITE, 1, "stale").unwrap();
            repo.save_error(SITE, 2, "timeout").unwrap();

            let orphans = repo.find_orphan_errors(SITE).unwrap();
            assert_eq!(orphans.len(), 1);
            assert_eq!(orphans[0].id, 1);
        }
    }

    #[test]
    fn test_errors_without_book() {
        for repo in create_test_repos() {
            repo.create_book(&book(1, 0, "A", BookStatus::InProgress))
                .unwrap();
            repo.create_book(&book(2, 0, "", BookStatus::Error)).unwrap();
            repo.save_error(SITE, 2, "timeout").unwrap();
            repo.save_error(SITE, 3, "timeout").unwrap();

            let records = repo.find_errors_without_book(SITE).unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].id, 3);
            assert!(repo.find_missing_ids(SITE).unwrap().is_empty());
        }
    }

    #[test]
    fn test_backup() {
        let dir = tempfile::tempdir().unwrap();
        for (i, repo) in create_test_repos().into_iter().enumerate() {
            repo.create_book(&book(1, 0, "A", BookStatus::InProgress))
                .unwrap();
            let path = repo.backup(dir.path(), &format!("backup-{i}")).unwrap();
            assert!(path.exists());
            assert!(std::fs::metadata(&path).unwrap().len() > 0);
        }
    }
}
