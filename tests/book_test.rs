//! Integration tests for book refresh and download

mod common;

use common::{book_page, serve, serve_finished_book, site_config, stored_book, stub_site, today, SITE};
use novelcrawl::book::RefreshOutcome;
use novelcrawl::models::{BookStatus, CONTENT_SEP};
use novelcrawl::storage::BookRepository;
use novelcrawl::utils::error::{BookError, FetchError, StorageError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_refresh_creates_first_version() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    serve(&server, "/book/1", book_page("A", "writer", &today(), "chapter 1")).await;

    let (site, repo) = stub_site(&server, site_config(&server, dir.path()));
    let refreshed = site.books().refresh(1).await.unwrap();

    assert_eq!(refreshed.outcome, RefreshOutcome::Created);
    assert_eq!(refreshed.book.version, 0);
    assert_eq!(refreshed.book.status, BookStatus::InProgress);

    let stored = repo.find_book(SITE, 1).unwrap().unwrap();
    assert_eq!(stored.title, "A");
    assert_eq!(stored.writer.name, "writer");
    assert!(repo.find_error(SITE, 1).unwrap().is_none());
}

#[tokio::test]
async fn test_refresh_is_idempotent() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    serve(&server, "/book/1", book_page("A", "writer", &today(), "chapter 1")).await;

    let (site, repo) = stub_site(&server, site_config(&server, dir.path()));
    site.books().refresh(1).await.unwrap();
    let second = site.books().refresh(1).await.unwrap();

    assert_eq!(second.outcome, RefreshOutcome::Unchanged);
    assert_eq!(repo.find_all_books(SITE).unwrap().len(), 1);
}

#[tokio::test]
async fn test_title_change_mints_new_version() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    serve(&server, "/book/1", book_page("B", "writer", &today(), "chapter 1")).await;

    let (site, repo) = stub_site(&server, site_config(&server, dir.path()));
    repo.create_book(&stored_book(1, "A", BookStatus::InProgress)).unwrap();

    let refreshed = site.books().refresh(1).await.unwrap();

    assert_eq!(refreshed.outcome, RefreshOutcome::NewVersion);
    assert!(refreshed.book.version > 0);
    assert_eq!(refreshed.book.status, BookStatus::InProgress);

    let first_version = repo.find_book_version(SITE, 1, 0).unwrap().unwrap();
    assert_eq!(first_version.title, "A");
    assert_eq!(repo.find_book(SITE, 1).unwrap().unwrap().title, "B");
}

#[tokio::test]
async fn test_progress_change_updates_in_place() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    serve(&server, "/book/1", book_page("A", "writer", &today(), "chapter 2")).await;

    let (site, repo) = stub_site(&server, site_config(&server, dir.path()));
    repo.create_book(&stored_book(1, "A", BookStatus::InProgress)).unwrap();

    let refreshed = site.books().refresh(1).await.unwrap();

    assert_eq!(refreshed.outcome, RefreshOutcome::Updated);
    assert_eq!(refreshed.book.version, 0);
    assert_eq!(repo.find_all_books(SITE).unwrap().len(), 1);
    assert_eq!(repo.find_book(SITE, 1).unwrap().unwrap().update_chapter, "chapter 2");
}

#[tokio::test]
async fn test_downloaded_book_with_new_chapter_mints_version() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    serve(&server, "/book/1", book_page("A", "writer", &today(), "chapter 2")).await;

    let (site, repo) = stub_site(&server, site_config(&server, dir.path()));
    repo.create_book(&stored_book(1, "A", BookStatus::Download)).unwrap();

    let refreshed = site.books().refresh(1).await.unwrap();

    assert_eq!(refreshed.outcome, RefreshOutcome::NewVersion);
    let first_version = repo.find_book_version(SITE, 1, 0).unwrap().unwrap();
    assert_eq!(first_version.status, BookStatus::Download);
    assert!(first_version.is_downloaded);
}

#[tokio::test]
async fn test_failed_refresh_records_error() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/book/7"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let (site, repo) = stub_site(&server, site_config(&server, dir.path()));
    let err = site.books().refresh(7).await.unwrap_err();

    assert!(matches!(err, BookError::Fetch(FetchError::Status(404))));

    let stored = repo.find_book(SITE, 7).unwrap().unwrap();
    assert_eq!(stored.version, 0);
    assert_eq!(stored.status, BookStatus::Error);

    let record = repo.find_error(SITE, 7).unwrap().unwrap();
    assert!(record.error.contains("404"));
}

#[tokio::test]
async fn test_failure_keeps_stored_status() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    serve(&server, "/book/1", "nothing to see here").await;

    let (site, repo) = stub_site(&server, site_config(&server, dir.path()));
    repo.create_book(&stored_book(1, "A", BookStatus::InProgress)).unwrap();

    assert!(site.books().refresh(1).await.is_err());

    let stored = repo.find_book(SITE, 1).unwrap().unwrap();
    assert_eq!(stored.status, BookStatus::InProgress);
    assert!(repo.find_error(SITE, 1).unwrap().is_some());
}

#[tokio::test]
async fn test_error_book_recovers() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    serve(&server, "/book/3", book_page("A", "writer", &today(), "chapter 1")).await;

    let (site, repo) = stub_site(&server, site_config(&server, dir.path()));
    repo.create_book(&novelcrawl::models::Book::new(SITE, 3)).unwrap();
    repo.save_error(SITE, 3, "timeout").unwrap();

    let refreshed = site.books().refresh(3).await.unwrap();

    assert_eq!(refreshed.outcome, RefreshOutcome::Updated);
    assert_eq!(refreshed.book.version, 0);
    assert_eq!(refreshed.book.title, "A");
    assert!(repo.find_error(SITE, 3).unwrap().is_none());
}

#[tokio::test]
async fn test_download_writes_chapters_in_order() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    serve_finished_book(&server, 1, 3).await;

    let (site, repo) = stub_site(&server, site_config(&server, dir.path()));
    let book = site.books().refresh(1).await.unwrap().book;
    assert_eq!(book.status, BookStatus::End);

    let downloaded = site.books().download(&book).await.unwrap();

    assert_eq!(downloaded.chapters, 3);
    assert_eq!(downloaded.failed_chapters, 0);
    assert_eq!(downloaded.path, dir.path().join("books").join("1.txt"));

    let content = std::fs::read_to_string(&downloaded.path).unwrap();
    let mut expected = format!("book 1\nwriter\n{CONTENT_SEP}\n\n");
    for n in 1..=3 {
        expected.push_str(&format!("chapter {n}\n{CONTENT_SEP}\ncontent {n}\n{CONTENT_SEP}\n"));
    }
    assert_eq!(content, expected);

    let stored = repo.find_book(SITE, 1).unwrap().unwrap();
    assert_eq!(stored.status, BookStatus::Download);
    assert!(stored.is_downloaded);
    assert_eq!(site.books().book_content(&stored).await.unwrap(), expected);
}

#[tokio::test]
async fn test_download_aborts_over_chapter_threshold() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    serve(&server, "/book/2", common::ended_book_page("book 2")).await;
    serve(&server, "/book/2/chapters", "/c/2/1|one\n/c/2/2|two\n/c/2/3|three\n").await;
    serve(&server, "/c/2/1", "content 1").await;

    let (site, repo) = stub_site(
        &server,
        novelcrawl::config::SiteConfig {
            max_chapters_error: 1,
            ..site_config(&server, dir.path())
        },
    );
    let book = site.books().refresh(2).await.unwrap().book;

    let err = site.books().download(&book).await.unwrap_err();

    assert!(matches!(err, BookError::TooManyChapterErrors { failed: 2, limit: 1 }));
    assert!(!dir.path().join("books").join("2.txt").exists());

    let stored = repo.find_book(SITE, 2).unwrap().unwrap();
    assert_eq!(stored.status, BookStatus::End);
    assert!(!stored.is_downloaded);
}

#[tokio::test]
async fn test_download_requires_finished_book() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let (site, repo) = stub_site(&server, site_config(&server, dir.path()));
    let book = stored_book(4, "A", BookStatus::InProgress);
    repo.create_book(&book).unwrap();

    let err = site.books().download(&book).await.unwrap_err();
    assert!(matches!(err, BookError::NotReady { downloaded: false, .. }));
}

#[tokio::test]
async fn test_download_of_unstored_book_writes_nothing() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/book/5/chapters"))
        .respond_with(ResponseTemplate::new(200).set_body_string("/c/5/1|one\n"))
        .expect(0)
        .mount(&server)
        .await;

    let (site, repo) = stub_site(&server, site_config(&server, dir.path()));
    let book = stored_book(5, "gone", BookStatus::End);

    let err = site.books().download(&book).await.unwrap_err();

    assert!(matches!(
        err,
        BookError::Storage(StorageError::BookNotFound { id: 5, version: 0, .. })
    ));
    assert!(!dir.path().join("books").join("5.txt").exists());
    assert!(repo.find_book(SITE, 5).unwrap().is_none());
}
