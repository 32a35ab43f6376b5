//! Book entity behaviour: refresh and download
//!
//! A book is identified by `(site, id, version)`. Refreshing fetches the book
//! page and moves the stored snapshot through the version state machine:
//!
//! - no stored row: create version 0
//! - stored row in error: update it in place with the first successful parse
//! - title, writer or type changed, or a downloaded book received new chapters:
//!   mint a new version, keeping the previous row
//! - update date or chapter changed: update in place
//! - otherwise: nothing is written
//!
//! Downloading fetches every chapter and writes the book file atomically.

pub mod lock;

pub use lock::{KeyedGuard, KeyedLock};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Datelike, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::client::ResilientClient;
use crate::config::SiteConfig;
use crate::models::{next_version, Book, BookStatus, Chapter, Writer};
use crate::storage::BookRepository;
use crate::utils::error::{BookError, FetchError, ParseError, StorageError};
use crate::utils::truncate_text;
use crate::vendor::{signals_end, BookInfo, ChapterListItem, VendorService};

/// Longest error text kept in the error table
const MAX_ERROR_LEN: usize = 1000;

/// What a successful refresh did to the stored snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Version 0 was created
    Created,
    /// A new version row was minted
    NewVersion,
    /// The latest row was updated in place
    Updated,
    /// Nothing changed
    Unchanged,
}

/// Result of a successful refresh
#[derive(Debug, Clone)]
pub struct Refreshed {
    /// Latest snapshot after the refresh
    pub book: Book,
    pub outcome: RefreshOutcome,
}

/// Result of a successful download
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub path: PathBuf,
    pub chapters: usize,
    pub failed_chapters: usize,
}

/// Refresh and download operations for the books of one site
pub struct BookService {
    site: String,
    client: Arc<ResilientClient>,
    vendor: Arc<dyn VendorService>,
    repo: Arc<dyn BookRepository>,
    storage: PathBuf,
    chapter_concurrency: usize,
    max_chapters_error: usize,
    locks: KeyedLock<i64>,
}

impl BookService {
    pub fn new(
        site: impl Into<String>,
        config: &SiteConfig,
        client: Arc<ResilientClient>,
        vendor: Arc<dyn VendorService>,
        repo: Arc<dyn BookRepository>,
    ) -> Self {
        Self {
            site: site.into(),
            client,
            vendor,
            repo,
            storage: config.storage.clone(),
            chapter_concurrency: config.max_download_concurrency.max(1),
            max_chapters_error: config.max_chapters_error,
            locks: KeyedLock::new(),
        }
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    /// Location of the downloaded file of a snapshot
    pub fn file_location(&self, book: &Book) -> PathBuf {
        self.storage.join(book.file_name())
    }

    /// Content of a downloaded book
    ///
    /// # Errors
    ///
    /// Returns `BookError::NotReady` if the book is not downloaded, or an I/O
    /// error if the file cannot be read
    pub async fn book_content(&self, book: &Book) -> Result<String, BookError> {
        if !book.is_downloaded {
            return Err(not_ready(book));
        }
        Ok(tokio::fs::read_to_string(self.file_location(book)).await?)
    }

    /// Fetch the book page of `id` and reconcile it with the stored snapshot
    ///
    /// On a fetch or parse failure an error record is saved, a version-0 row
    /// in error is created if the id was unknown, and the failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the fetch or parse failure, or a storage error
    pub async fn refresh(&self, id: i64) -> Result<Refreshed, BookError> {
        let _guard = self.locks.lock(id).await;
        let stored = self.repo.find_book(&self.site, id)?;

        let info = match self.fetch_book_info(id).await {
            Ok(info) => info,
            Err(err) => {
                self.record_failure(id, stored.is_none(), &err)?;
                return Err(err);
            }
        };

        let status = if signals_end(&info, Utc::now().year()) {
            BookStatus::End
        } else {
            BookStatus::InProgress
        };

        let refreshed = match stored {
            None => {
                let book = snapshot(&self.site, id, 0, &info, status);
                self.repo.create_book(&book)?;
                info!(site = %self.site, id, title = %book.title, "New book found");
                Refreshed {
                    book,
                    outcome: RefreshOutcome::Created,
                }
            }
            Some(stored) if stored.status == BookStatus::Error => {
                let book = snapshot(&self.site, id, stored.version, &info, status);
                self.repo.update_book(&book)?;
                info!(site = %self.site, id, title = %book.title, "Book recovered from error");
                Refreshed {
                    book,
                    outcome: RefreshOutcome::Updated,
                }
            }
            Some(stored)
                if identity_changed(&stored, &info)
                    || (stored.status == BookStatus::Download && progress_changed(&stored, &info)) =>
            {
                let version = next_version(stored.version, Utc::now().timestamp());
                let book = snapshot(&self.site, id, version, &info, status);
                self.repo.create_book(&book)?;
                info!(
                    site = %self.site,
                    id,
                    version = %book.version_code(),
                    previous_title = %stored.title,
                    title = %book.title,
                    "New book version minted"
                );
                Refreshed {
                    book,
                    outcome: RefreshOutcome::NewVersion,
                }
            }
            Some(stored) if progress_changed(&stored, &info) => {
                let book = Book {
                    update_date: info.update_date.clone(),
                    update_chapter: info.update_chapter.clone(),
                    status,
                    is_downloaded: false,
                    ..stored
                };
                self.repo.update_book(&book)?;
                debug!(site = %self.site, id, chapter = %book.update_chapter, "Book updated");
                Refreshed {
                    book,
                    outcome: RefreshOutcome::Updated,
                }
            }
            Some(stored) => Refreshed {
                book: stored,
                outcome: RefreshOutcome::Unchanged,
            },
        };

        self.repo.delete_error(&self.site, id)?;
        Ok(refreshed)
    }

    /// Download every chapter of a finished book and write its file
    ///
    /// Chapters are fetched with at most `max_download_concurrency` in flight,
    /// each request holding its own bulkhead permit, and written in list
    /// order. The download is abandoned, leaving the book
    /// untouched and no file at the final path, once more than
    /// `max_chapters_error` chapters fail.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::BookNotFound` if the row is gone,
    /// `BookError::NotReady` unless the stored book is `End` and not
    /// downloaded; otherwise fetch, parse, chapter-threshold, I/O or storage
    /// failures
    pub async fn download(&self, book: &Book) -> Result<Downloaded, BookError> {
        let _guard = self.locks.lock(book.id).await;

        let stored = self
            .repo
            .find_book_version(&self.site, book.id, book.version)?
            .ok_or_else(|| StorageError::BookNotFound {
                site: book.site.clone(),
                id: book.id,
                version: book.version,
            })?;
        if stored.status != BookStatus::End || stored.is_downloaded {
            return Err(not_ready(&stored));
        }

        let body = {
            let _permit = self.client.acquire().await?;
            self.client.get(&self.vendor.chapter_list_url(stored.id)).await?
        };
        let items = self.vendor.parse_chapter_list(stored.id, &body)?;
        if items.is_empty() {
            return Err(ParseError::EmptyChapterList.into());
        }

        info!(site = %self.site, id = stored.id, chapters = items.len(), "Downloading book");

        let mut chapters = Vec::with_capacity(items.len());
        let mut failed = 0;
        let mut pending = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| self.fetch_chapter(index, item))
            .buffered(self.chapter_concurrency);

        while let Some(chapter) = pending.next().await {
            let chapter = chapter?;
            if let Some(error) = &chapter.error {
                failed += 1;
                warn!(
                    site = %self.site,
                    id = stored.id,
                    chapter = chapter.index,
                    url = %chapter.url,
                    error = %error,
                    "Chapter download failed"
                );
                if failed > self.max_chapters_error {
                    return Err(BookError::TooManyChapterErrors {
                        failed,
                        limit: self.max_chapters_error,
                    });
                }
            }
            chapters.push(chapter);
        }

        let path = self.file_location(&stored);
        write_book_file(&path, &stored, &chapters).await?;

        let book = Book {
            status: BookStatus::Download,
            is_downloaded: true,
            ..stored
        };
        self.repo.update_book(&book)?;

        info!(site = %self.site, id = book.id, path = %path.display(), failed, "Book downloaded");
        Ok(Downloaded {
            path,
            chapters: chapters.len(),
            failed_chapters: failed,
        })
    }

    async fn fetch_book_info(&self, id: i64) -> Result<BookInfo, BookError> {
        let body = self.client.get(&self.vendor.book_url(id)).await?;
        if !self.vendor.is_available(&body) {
            return Err(ParseError::PageUnavailable.into());
        }
        Ok(self.vendor.parse_book(&body)?)
    }

    /// Fetch one chapter under its own bulkhead permit
    ///
    /// Fetch and parse failures are kept on the chapter; only cancellation
    /// while waiting for a permit is returned as an error.
    async fn fetch_chapter(&self, index: usize, item: ChapterListItem) -> Result<Chapter, BookError> {
        let mut chapter = Chapter::new(index, item.url, item.title);

        let fetched = {
            let _permit = self.client.acquire().await?;
            self.client.get(&chapter.url).await
        };
        let parsed = match fetched {
            Ok(body) => self.vendor.parse_chapter(&body).map_err(BookError::from),
            Err(err) => Err(BookError::from(err)),
        };

        match parsed {
            Ok(info) => {
                if chapter.title.is_empty() {
                    chapter.title = info.title;
                }
                chapter.content = info.body;
                chapter.optimize_content();
            }
            Err(err) => chapter.error = Some(err.to_string()),
        }

        Ok(chapter)
    }

    fn record_failure(&self, id: i64, is_new: bool, err: &BookError) -> Result<(), BookError> {
        if matches!(err, BookError::Fetch(FetchError::Cancelled)) {
            return Ok(());
        }

        debug!(site = %self.site, id, error = %err, "Book refresh failed");
        self.repo
            .save_error(&self.site, id, &truncate_text(&err.to_string(), MAX_ERROR_LEN))?;

        if is_new {
            self.repo.create_book(&Book::new(self.site.clone(), id))?;
        }

        Ok(())
    }
}

fn not_ready(book: &Book) -> BookError {
    BookError::NotReady {
        status: book.status.to_string(),
        downloaded: book.is_downloaded,
    }
}

fn snapshot(site: &str, id: i64, version: i64, info: &BookInfo, status: BookStatus) -> Book {
    Book {
        version,
        title: info.title.clone(),
        writer: Writer::new(info.writer.clone()),
        book_type: info.book_type.clone(),
        update_date: info.update_date.clone(),
        update_chapter: info.update_chapter.clone(),
        status,
        ..Book::new(site, id)
    }
}

fn identity_changed(stored: &Book, info: &BookInfo) -> bool {
    stored.title != info.title || stored.writer.name != info.writer || stored.book_type != info.book_type
}

fn progress_changed(stored: &Book, info: &BookInfo) -> bool {
    stored.update_date != info.update_date || stored.update_chapter != info.update_chapter
}

async fn write_book_file(path: &Path, book: &Book, chapters: &[Chapter]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut content = book.header_info();
    for chapter in chapters {
        content.push_str(&chapter.content_string());
    }

    let partial = path.with_extension("txt.part");
    let written = match tokio::fs::write(&partial, content).await {
        Ok(()) => tokio::fs::rename(&partial, path).await,
        Err(err) => Err(err),
    };

    if written.is_err() {
        if let Err(err) = tokio::fs::remove_file(&partial).await {
            debug!(path = %partial.display(), error = %err, "Partial book file not removed");
        }
    }
    written
}
