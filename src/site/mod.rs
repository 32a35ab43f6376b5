//! Site orchestration
//!
//! A [`Site`] drives the crawl algorithms over every id of one source:
//!
//! - **explore**: probe ids past the known frontier until too many fail in a row
//! - **update** / **update_error**: refresh known books, or only those in error
//! - **download**: archive finished books
//! - **fix**: repair duplicates, stale error records and storage flags
//! - **check** / **check_end**: read-only consistency reports
//! - **backup** and **process**, the full maintenance pass
//!
//! Every algorithm runs as a named stage in the shared [`StageTracker`] and
//! returns a serializable report.

pub mod context;
pub mod explore;
pub mod pool;
pub mod stage;

pub use context::CrawlContext;
pub use explore::{run_frontier, FrontierReport};
pub use pool::WorkerPool;
pub use stage::{StageGuard, StageTracker};

use std::collections::BTreeSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::book::BookService;
use crate::client::ResilientClient;
use crate::config::SiteConfig;
use crate::error::Result;
use crate::models::{Book, BookStatus, Summary};
use crate::storage::BookRepository;
use crate::utils::error::BookError;
use crate::vendor::{SelectorVendor, VendorService};

/// Error text saved for `Error` books that lost their error record
const MISSING_ERROR_RECORD: &str = "error record missing";

/// Outcome of a batch of book operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items never started because the run was cancelled
    pub not_started: usize,
}

/// Outcome of an explore run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExploreReport {
    /// Error ids between the latest success and the max id
    pub rechecked: FrontierReport,
    /// Ids past the max id
    pub discovered: FrontierReport,
    pub max_id_before: i64,
    pub max_id_after: i64,
}

/// Outcome of a fix run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FixReport {
    pub duplicates_removed: usize,
    pub orphan_errors_removed: usize,
    pub error_records_added: usize,
    /// Rows whose file exists but were not marked downloaded
    pub marked_downloaded: usize,
    /// Rows marked downloaded whose file is gone
    pub marked_end: usize,
    /// Rows skipped because their file could not be inspected
    pub storage_skipped: usize,
    /// Error records without any book row, probed with the missing ids
    pub errors_without_book: usize,
    pub missing_ids: BatchReport,
}

/// `(id, version)` of a stored row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BookRef {
    pub id: i64,
    pub version: i64,
}

impl From<&Book> for BookRef {
    fn from(book: &Book) -> Self {
        Self {
            id: book.id,
            version: book.version,
        }
    }
}

/// Read-only consistency report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub summary: Summary,
    /// Ids below the max id the source may still have
    pub missing_ids: Vec<i64>,
    /// Rows identical to the previous version of the same id
    pub duplicate_books: Vec<BookRef>,
    /// Error records of books whose latest version parsed
    pub orphan_errors: Vec<i64>,
    /// `Error` books without an error record
    pub errors_without_record: Vec<i64>,
    /// Error records without any book row
    pub errors_without_book: Vec<i64>,
}

/// Books whose completion state needs attention
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckEndReport {
    /// Finished books not yet downloaded
    pub end_not_downloaded: Vec<i64>,
    /// In-progress books whose stored data already signals completion
    pub in_progress_ended: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupReport {
    pub path: PathBuf,
}

/// A stage of `process` that failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: String,
    pub error: String,
}

/// Outcome of a full maintenance pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub available: bool,
    pub backup: Option<BackupReport>,
    pub update: Option<BatchReport>,
    pub explore: Option<ExploreReport>,
    pub download: Option<BatchReport>,
    pub fix: Option<FixReport>,
    pub failures: Vec<StageFailure>,
}

/// One crawled source
pub struct Site {
    name: String,
    config: SiteConfig,
    context: CrawlContext,
    client: Arc<ResilientClient>,
    vendor: Arc<dyn VendorService>,
    repo: Arc<dyn BookRepository>,
    books: Arc<BookService>,
}

impl Site {
    /// Create a site with an explicit vendor
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(
        name: impl Into<String>,
        config: SiteConfig,
        context: CrawlContext,
        vendor: Arc<dyn VendorService>,
        repo: Arc<dyn BookRepository>,
    ) -> Result<Self> {
        let name = name.into();
        let client = Arc::new(ResilientClient::new(
            name.clone(),
            &config,
            Arc::clone(&context.global_slots),
            context.cancel.clone(),
        )?);
        let books = Arc::new(BookService::new(
            name.clone(),
            &config,
            Arc::clone(&client),
            Arc::clone(&vendor),
            Arc::clone(&repo),
        ));

        Ok(Self {
            name,
            config,
            context,
            client,
            vendor,
            repo,
            books,
        })
    }

    /// Create a site parsed with the selectors of its configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a selector is invalid or the HTTP client cannot be built
    pub fn from_config(
        name: impl Into<String>,
        config: SiteConfig,
        context: CrawlContext,
        repo: Arc<dyn BookRepository>,
    ) -> Result<Self> {
        let vendor: Arc<dyn VendorService> = Arc::new(SelectorVendor::new(&config)?);
        Self::new(name, config, context, vendor, repo)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<ResilientClient> {
        &self.client
    }

    pub fn books(&self) -> &Arc<BookService> {
        &self.books
    }

    pub fn repository(&self) -> &Arc<dyn BookRepository> {
        &self.repo
    }

    /// Whether the source's availability page shows it as up
    pub async fn is_available(&self) -> bool {
        let _stage = self.enter("check-availability");

        let Ok(_permit) = self.client.acquire().await else {
            return false;
        };
        match self.client.get(&self.vendor.availability_url()).await {
            Ok(body) => self.vendor.is_available(&body),
            Err(err) => {
                warn!(site = %self.name, error = %err, "Availability check failed");
                false
            }
        }
    }

    /// Probe ids past the known frontier
    ///
    /// Stored error ids between the latest successful id and the max id are
    /// probed first, then new ids from `max_id + 1`. Both phases share one
    /// consecutive-failure counter gated by `max_explore_error`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the summary cannot be read
    pub async fn explore(&self) -> Result<ExploreReport> {
        let _stage = self.enter("explore");

        let before = self.repo.summary(&self.name)?;
        let failures = Arc::new(AtomicUsize::new(0));
        let max_errors = self.config.max_explore_error;
        let cancel = &self.context.cancel;

        info!(
            site = %self.name,
            latest_success_id = before.latest_success_id,
            max_id = before.max_id,
            "Exploring"
        );

        let rechecked = run_frontier(
            (before.latest_success_id + 1)..=before.max_id,
            max_errors,
            &failures,
            cancel,
            |id| self.probe(id),
        )
        .await;

        let discovered = run_frontier(
            (before.max_id + 1)..,
            max_errors,
            &failures,
            cancel,
            |id| self.probe(id),
        )
        .await;

        let after = self.repo.summary(&self.name)?;
        info!(
            site = %self.name,
            rechecked = rechecked.succeeded,
            discovered = discovered.succeeded,
            max_id = after.max_id,
            "Explore finished"
        );

        Ok(ExploreReport {
            rechecked,
            discovered,
            max_id_before: before.max_id,
            max_id_after: after.max_id,
        })
    }

    /// Refresh every known book, most recently updated first
    ///
    /// # Errors
    ///
    /// Returns a storage error if the books cannot be listed
    pub async fn update(&self) -> Result<BatchReport> {
        let _stage = self.enter("update");

        let ids: Vec<i64> = self
            .repo
            .find_books_for_update(&self.name)?
            .iter()
            .map(|book| book.id)
            .collect();

        Ok(self.run_batch("update", ids, |id| self.refresh_task(id)).await)
    }

    /// Refresh only the books with an error record
    ///
    /// # Errors
    ///
    /// Returns a storage error if the error records cannot be listed
    pub async fn update_error(&self) -> Result<BatchReport> {
        let _stage = self.enter("update-error");

        let ids: Vec<i64> = self
            .repo
            .find_errors(&self.name)?
            .iter()
            .map(|record| record.id)
            .collect();

        Ok(self.run_batch("update-error", ids, |id| self.refresh_task(id)).await)
    }

    /// Download every finished book not yet archived
    ///
    /// # Errors
    ///
    /// Returns a storage error if the books cannot be listed
    pub async fn download(&self) -> Result<BatchReport> {
        let _stage = self.enter("download");

        let books = self.repo.find_books_for_download(&self.name)?;
        info!(site = %self.name, books = books.len(), "Downloading books");

        // chapter requests take their own permits, so books are bounded by a local gate
        let gate = Arc::new(Semaphore::new(self.config.max_threads.max(1)));
        let admit = || {
            let gate = Arc::clone(&gate);
            async move {
                tokio::select! {
                    biased;
                    _ = self.context.cancel.cancelled() => None,
                    permit = gate.acquire_owned() => permit.ok(),
                }
            }
        };

        Ok(self
            .run_batch_with("download", books, admit, |book| {
                let service = Arc::clone(&self.books);
                async move {
                    match service.download(&book).await {
                        Ok(_) => Ok(()),
                        Err(err) => {
                            warn!(site = %book.site, id = book.id, error = %err, "Book download failed");
                            Err(err)
                        }
                    }
                }
            })
            .await)
    }

    /// Repair the stored state of the site
    ///
    /// Removes duplicate rows and stale error records, restores missing error
    /// records, reconciles download flags with the files on disk and probes
    /// ids missing below the max id along with error records that have no
    /// book row.
    ///
    /// # Errors
    ///
    /// Returns a storage error
    pub async fn fix(&self) -> Result<FixReport> {
        let _stage = self.enter("fix");
        let mut report = FixReport {
            duplicates_removed: self.repo.delete_duplicate_books(&self.name)?,
            ..Default::default()
        };

        for record in self.repo.find_orphan_errors(&self.name)? {
            if self.repo.delete_error(&self.name, record.id)? {
                report.orphan_errors_removed += 1;
            }
        }

        let recorded: BTreeSet<i64> = self
            .repo
            .find_errors(&self.name)?
            .iter()
            .map(|record| record.id)
            .collect();
        for book in self.repo.find_latest_books(&self.name)? {
            if book.status == BookStatus::Error && !recorded.contains(&book.id) {
                self.repo.save_error(&self.name, book.id, MISSING_ERROR_RECORD)?;
                report.error_records_added += 1;
            }
        }

        for book in self.repo.find_all_books(&self.name)? {
            if book.status == BookStatus::Error {
                continue;
            }

            let location = self.books.file_location(&book);
            let exists = match tokio::fs::try_exists(&location).await {
                Ok(exists) => exists,
                Err(err) => {
                    warn!(
                        site = %self.name,
                        book = %book,
                        path = %location.display(),
                        error = %err,
                        "Cannot inspect book file, skipping"
                    );
                    report.storage_skipped += 1;
                    continue;
                }
            };

            if exists && !book.is_downloaded {
                debug!(site = %self.name, book = %book, "File exists for book not marked downloaded");
                self.repo.update_book(&Book {
                    status: BookStatus::Download,
                    is_downloaded: true,
                    ..book
                })?;
                report.marked_downloaded += 1;
            } else if !exists && book.is_downloaded {
                debug!(site = %self.name, book = %book, "File missing for downloaded book");
                self.repo.update_book(&Book {
                    status: BookStatus::End,
                    is_downloaded: false,
                    ..book
                })?;
                report.marked_end += 1;
            }
        }

        let mut missing: BTreeSet<i64> = self
            .vendor
            .find_missing_ids(&self.repo.find_ids(&self.name)?)
            .into_iter()
            .collect();
        let errors_without_book: Vec<i64> = self
            .repo
            .find_errors_without_book(&self.name)?
            .iter()
            .map(|record| record.id)
            .collect();
        report.errors_without_book = errors_without_book.len();
        missing.extend(errors_without_book);

        let missing: Vec<i64> = missing.into_iter().collect();
        if !missing.is_empty() {
            info!(site = %self.name, missing = missing.len(), "Probing missing ids");
        }
        report.missing_ids = self.run_batch("fix", missing, |id| self.refresh_task(id)).await;

        info!(
            site = %self.name,
            duplicates = report.duplicates_removed,
            orphan_errors = report.orphan_errors_removed,
            error_records = report.error_records_added,
            marked_downloaded = report.marked_downloaded,
            marked_end = report.marked_end,
            errors_without_book = report.errors_without_book,
            "Fix finished"
        );
        Ok(report)
    }

    /// Read-only consistency report
    ///
    /// # Errors
    ///
    /// Returns a storage error
    pub fn check(&self) -> Result<CheckReport> {
        let _stage = self.enter("check");

        let summary = self.repo.summary(&self.name)?;
        let missing_ids = self.vendor.find_missing_ids(&self.repo.find_ids(&self.name)?);
        let duplicate_books = self
            .repo
            .find_duplicate_books(&self.name)?
            .iter()
            .map(BookRef::from)
            .collect();
        let orphan_errors = self
            .repo
            .find_orphan_errors(&self.name)?
            .iter()
            .map(|record| record.id)
            .collect();

        let recorded: BTreeSet<i64> = self
            .repo
            .find_errors(&self.name)?
            .iter()
            .map(|record| record.id)
            .collect();
        let errors_without_record = self
            .repo
            .find_latest_books(&self.name)?
            .iter()
            .filter(|book| book.status == BookStatus::Error && !recorded.contains(&book.id))
            .map(|book| book.id)
            .collect();

        let errors_without_book = self
            .repo
            .find_errors_without_book(&self.name)?
            .iter()
            .map(|record| record.id)
            .collect();

        Ok(CheckReport {
            summary,
            missing_ids,
            duplicate_books,
            orphan_errors,
            errors_without_record,
            errors_without_book,
        })
    }

    /// Books whose completion state needs attention
    ///
    /// # Errors
    ///
    /// Returns a storage error
    pub fn check_end(&self) -> Result<CheckEndReport> {
        let _stage = self.enter("check-end");
        let year = Utc::now().year();

        let mut report = CheckEndReport::default();
        for book in self.repo.find_latest_books(&self.name)? {
            match book.status {
                BookStatus::End if !book.is_downloaded => report.end_not_downloaded.push(book.id),
                BookStatus::InProgress if book.signals_end(year) => {
                    report.in_progress_ended.push(book.id)
                }
                _ => {}
            }
        }
        Ok(report)
    }

    /// Copy the store into the site's backup directory
    ///
    /// # Errors
    ///
    /// Returns a storage error if the copy fails
    pub async fn backup(&self) -> Result<BackupReport> {
        let _stage = self.enter("backup");

        tokio::fs::create_dir_all(&self.config.backup_directory).await?;
        let file = format!("{}_{}.db", self.name, Utc::now().format("%Y%m%d%H%M%S"));
        let path = self.repo.backup(&self.config.backup_directory, &file)?;

        info!(site = %self.name, path = %path.display(), "Backup written");
        Ok(BackupReport { path })
    }

    /// Derived statistics of the site
    ///
    /// # Errors
    ///
    /// Returns a storage error
    pub fn info(&self) -> Result<Summary> {
        Ok(self.repo.summary(&self.name)?)
    }

    /// Full maintenance pass: backup, update, explore, download, fix
    ///
    /// A failing stage is logged and reported without stopping the later
    /// ones. Network stages are skipped while the source is unavailable.
    pub async fn process(&self) -> ProcessReport {
        let mut report = ProcessReport::default();

        report.backup = self.stage_result(&mut report.failures, "backup", self.backup().await);

        report.available = self.is_available().await;
        if report.available {
            report.update = self.stage_result(&mut report.failures, "update", self.update().await);
            report.explore = self.stage_result(&mut report.failures, "explore", self.explore().await);
            report.download = self.stage_result(&mut report.failures, "download", self.download().await);
        } else {
            warn!(site = %self.name, "Source unavailable, skipping network stages");
            report.failures.push(StageFailure {
                stage: String::from("check-availability"),
                error: String::from("source unavailable"),
            });
        }

        report.fix = self.stage_result(&mut report.failures, "fix", self.fix().await);
        report
    }

    fn enter(&self, stage: &str) -> StageGuard {
        self.context.stages.enter(&self.name, stage)
    }

    fn stage_result<T>(&self, failures: &mut Vec<StageFailure>, stage: &str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                error!(site = %self.name, stage, error = %err, "Stage failed");
                failures.push(StageFailure {
                    stage: stage.to_string(),
                    error: err.to_string(),
                });
                None
            }
        }
    }

    /// Probe one id for explore, holding a permit for the whole refresh
    fn probe(&self, id: i64) -> impl Future<Output = bool> + Send + 'static {
        let client = Arc::clone(&self.client);
        let books = Arc::clone(&self.books);
        async move {
            let Ok(_permit) = client.acquire().await else {
                return false;
            };
            books.refresh(id).await.is_ok()
        }
    }

    fn refresh_task(&self, id: i64) -> impl Future<Output = std::result::Result<(), BookError>> + Send + 'static {
        let books = Arc::clone(&self.books);
        async move { books.refresh(id).await.map(|_| ()) }
    }

    /// Run `task` for every item, one bulkhead permit per task
    async fn run_batch<T, F, Fut>(&self, stage: &str, items: Vec<T>, task: F) -> BatchReport
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = std::result::Result<(), BookError>> + Send + 'static,
    {
        self.run_batch_with(stage, items, || async { self.client.acquire().await.ok() }, task)
            .await
    }

    /// Run `task` for every item, holding the slot returned by `admit`
    ///
    /// The slot is taken before spawning, so dispatch waits for free slots.
    /// `admit` returning `None` means cancellation: dispatch stops and
    /// started tasks run to completion.
    async fn run_batch_with<T, A, AF, P, F, Fut>(
        &self,
        stage: &str,
        items: Vec<T>,
        admit: A,
        task: F,
    ) -> BatchReport
    where
        A: Fn() -> AF,
        AF: Future<Output = Option<P>>,
        P: Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = std::result::Result<(), BookError>> + Send + 'static,
    {
        let mut report = BatchReport {
            total: items.len(),
            ..Default::default()
        };
        let mut pool = WorkerPool::new();

        for item in items {
            let Some(slot) = admit().await else {
                warn!(site = %self.name, stage, "Cancelled, stop dispatching");
                break;
            };

            let job = task(item);
            pool.spawn(async move {
                let result = job.await;
                drop(slot);
                result
            });
            report.dispatched += 1;
        }

        for result in pool.drain().await {
            match result {
                Ok(()) => report.succeeded += 1,
                Err(err) => {
                    report.failed += 1;
                    debug!(site = %self.name, stage, error = %err, "Task failed");
                }
            }
        }
        report.not_started = report.total - report.dispatched;

        info!(
            site = %self.name,
            stage,
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            not_started = report.not_started,
            "Batch finished"
        );
        report
    }
}
