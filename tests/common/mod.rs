//! Common test utilities

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use novelcrawl::config::{SiteConfig, UrlConfig};
use novelcrawl::models::{Book, BookStatus, Writer};
use novelcrawl::site::{CrawlContext, Site};
use novelcrawl::storage::{BookRepository, MemoryBookRepository};
use novelcrawl::utils::error::ParseError;
use novelcrawl::utils::retry::RetryPolicy;
use novelcrawl::vendor::{BookInfo, ChapterInfo, ChapterListItem, VendorService};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SITE: &str = "stub";

/// Vendor reading plain `key: value` pages
///
/// Book pages carry `title`, `writer`, `type`, `date`, `chapter` and an
/// optional `end: true`; chapter lists carry one `link|title` per line.
pub struct StubVendor {
    base: String,
}

impl StubVendor {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl VendorService for StubVendor {
    fn book_url(&self, id: i64) -> String {
        format!("{}/book/{id}", self.base)
    }

    fn chapter_list_url(&self, id: i64) -> String {
        format!("{}/book/{id}/chapters", self.base)
    }

    fn chapter_url(&self, parts: &[&str]) -> String {
        format!("{}{}", self.base, parts.last().copied().unwrap_or_default())
    }

    fn availability_url(&self) -> String {
        format!("{}/", self.base)
    }

    fn parse_book(&self, body: &str) -> Result<BookInfo, ParseError> {
        let mut info = BookInfo::default();
        for line in body.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "title" => info.title = value,
                "writer" => info.writer = value,
                "type" => info.book_type = value,
                "date" => info.update_date = value,
                "chapter" => info.update_chapter = value,
                "end" => info.is_end = value == "true",
                _ => {}
            }
        }

        if info.title.is_empty() {
            return Err(ParseError::FieldNotFound("title"));
        }
        Ok(info)
    }

    fn parse_chapter_list(&self, id: i64, body: &str) -> Result<Vec<ChapterListItem>, ParseError> {
        let id = id.to_string();
        let items: Vec<ChapterListItem> = body
            .lines()
            .filter_map(|line| line.split_once('|'))
            .map(|(link, title)| ChapterListItem {
                url: self.chapter_url(&[&id, link.trim()]),
                title: title.trim().to_string(),
            })
            .collect();

        if items.is_empty() {
            return Err(ParseError::EmptyChapterList);
        }
        Ok(items)
    }

    fn parse_chapter(&self, body: &str) -> Result<ChapterInfo, ParseError> {
        Ok(ChapterInfo {
            title: String::new(),
            body: body.trim().to_string(),
        })
    }

    fn is_available(&self, body: &str) -> bool {
        !body.contains("unavailable")
    }
}

/// Current date, never old enough to mark a book finished
pub fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

/// Book page in the stub format
pub fn book_page(title: &str, writer: &str, date: &str, chapter: &str) -> String {
    format!("title: {title}\nwriter: {writer}\ntype: fantasy\ndate: {date}\nchapter: {chapter}\n")
}

/// Book page of a finished book
pub fn ended_book_page(title: &str) -> String {
    format!("{}end: true\n", book_page(title, "writer", &today(), "last"))
}

/// Site configuration pointing at `server`, with fast retries
pub fn site_config(server: &MockServer, storage: &Path) -> SiteConfig {
    let base = server.uri();
    SiteConfig {
        max_threads: 4,
        request_timeout_secs: 5,
        retry: RetryPolicy {
            retry_unavailable: 1,
            retry_error: 0,
            interval_ms: 1,
        },
        storage: storage.join("books"),
        backup_directory: storage.join("backup"),
        max_explore_error: 3,
        max_download_concurrency: 2,
        max_chapters_error: 1,
        urls: UrlConfig {
            base: format!("{base}/book/{{id}}"),
            download: format!("{base}/book/{{id}}/chapters"),
            chapter_prefix: format!("{base}/book/{{id}}/"),
            availability: format!("{base}/"),
        },
        ..Default::default()
    }
}

/// Site backed by an in-memory repository and the stub vendor
pub fn stub_site(server: &MockServer, config: SiteConfig) -> (Site, Arc<MemoryBookRepository>) {
    stub_site_in(server, config, CrawlContext::new(16))
}

/// Same as [`stub_site`] with an explicit process-wide context
pub fn stub_site_in(
    server: &MockServer,
    config: SiteConfig,
    context: CrawlContext,
) -> (Site, Arc<MemoryBookRepository>) {
    let repo = Arc::new(MemoryBookRepository::new());
    let vendor = Arc::new(StubVendor::new(server.uri()));
    let site = Site::new(
        SITE,
        config,
        context,
        vendor,
        Arc::clone(&repo) as Arc<dyn BookRepository>,
    )
    .unwrap();
    (site, repo)
}

/// Stored book with the given status
pub fn stored_book(id: i64, title: &str, status: BookStatus) -> Book {
    Book {
        title: title.to_string(),
        writer: Writer::new("writer"),
        book_type: String::from("fantasy"),
        update_date: today(),
        update_chapter: String::from("chapter 1"),
        status,
        is_downloaded: status == BookStatus::Download,
        ..Book::new(SITE, id)
    }
}

/// Serve `body` at `route`
pub async fn serve(server: &MockServer, route: &str, body: impl Into<String>) {
    Mock::given(method("GET"))
        .and(path(route.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.into()))
        .mount(server)
        .await;
}

/// Serve a finished book with chapters `/c/1`..`/c/n`
pub async fn serve_finished_book(server: &MockServer, id: i64, chapters: usize) {
    serve(server, &format!("/book/{id}"), ended_book_page(&format!("book {id}"))).await;

    let list: String = (1..=chapters)
        .map(|n| format!("/c/{id}/{n}|chapter {n}\n"))
        .collect();
    serve(server, &format!("/book/{id}/chapters"), list).await;

    for n in 1..=chapters {
        serve(server, &format!("/c/{id}/{n}"), format!("content {n}")).await;
    }
}

/// Serve a finished book whose chapter pages each answer after `delay`
pub async fn serve_slow_book(server: &MockServer, id: i64, chapters: usize, delay: Duration) {
    serve(server, &format!("/book/{id}"), ended_book_page(&format!("book {id}"))).await;

    let list: String = (1..=chapters)
        .map(|n| format!("/c/{id}/{n}|chapter {n}\n"))
        .collect();
    serve(server, &format!("/book/{id}/chapters"), list).await;

    for n in 1..=chapters {
        Mock::given(method("GET"))
            .and(path(format!("/c/{id}/{n}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("content {n}"))
                    .set_delay(delay),
            )
            .mount(server)
            .await;
    }
}
