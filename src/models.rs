// Core data structures for novelcrawl

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::to_base36;

/// Separator line used in book files
pub const CONTENT_SEP: &str = "--------------------";

/// Chapter labels that mark the end of a serialized novel
pub const CHAPTER_END_KEYWORDS: &[&str] = &[
    // traditional chinese
    "番外", "結局", "新書", "完結", "尾聲", "感言", "後記", "完本", "全書完", "全文完", "全文終",
    "全文結", "劇終", "（完）", "終章", "外傳", "結尾",
    // simplified chinese
    "结局", "新书", "完结", "尾声", "后记", "全书完", "全文终", "全文结", "剧终", "终章", "外传",
    "结尾",
];

/// Lifecycle status of a book snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookStatus {
    Error,
    InProgress,
    End,
    Download,
}

impl BookStatus {
    /// Get string representation as stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::InProgress => "INPROGRESS",
            Self::End => "END",
            Self::Download => "DOWNLOAD",
        }
    }

    /// Get all statuses
    pub fn all() -> [Self; 4] {
        [Self::Error, Self::InProgress, Self::End, Self::Download]
    }
}

impl fmt::Display for BookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ERROR" => Ok(Self::Error),
            "INPROGRESS" | "IN_PROGRESS" => Ok(Self::InProgress),
            "END" => Ok(Self::End),
            "DOWNLOAD" => Ok(Self::Download),
            other => Err(format!("unknown book status {other}")),
        }
    }
}

/// Book author; the id is assigned by the repository on first save
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Writer {
    pub id: Option<i64>,
    pub name: String,
}

impl Writer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}

/// One snapshot of a book, identified by `(site, id, version)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub site: String,
    pub id: i64,
    /// 0 for the first snapshot, wall-clock derived afterwards
    pub version: i64,
    pub title: String,
    pub writer: Writer,
    pub book_type: String,
    pub update_date: String,
    pub update_chapter: String,
    pub status: BookStatus,
    pub is_downloaded: bool,
    pub error: Option<String>,
}

impl Book {
    /// Create an empty first snapshot for `(site, id)`
    pub fn new(site: impl Into<String>, id: i64) -> Self {
        Self {
            site: site.into(),
            id,
            version: 0,
            title: String::new(),
            writer: Writer::default(),
            book_type: String::new(),
            update_date: String::new(),
            update_chapter: String::new(),
            status: BookStatus::Error,
            is_downloaded: false,
            error: None,
        }
    }

    /// Version formatted in base 36
    pub fn version_code(&self) -> String {
        to_base36(self.version.max(0) as u64)
    }

    /// File name of the downloaded content of this snapshot
    pub fn file_name(&self) -> String {
        if self.version == 0 {
            format!("{}.txt", self.id)
        } else {
            format!("{}-v{}.txt", self.id, self.version_code())
        }
    }

    /// Header written at the top of the book file
    pub fn header_info(&self) -> String {
        format!("{}\n{}\n{}\n\n", self.title, self.writer.name, CONTENT_SEP)
    }

    /// Whether the stored fields already indicate a finished book
    pub fn signals_end(&self, current_year: i32) -> bool {
        date_signals_end(&self.update_date, current_year)
            || chapter_signals_end(&self.update_chapter)
    }
}

impl fmt::Display for Book {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.site, self.id)?;
        if self.version > 0 {
            write!(f, "-{}", self.version_code())?;
        }
        Ok(())
    }
}

/// Whether a chapter label carries one of the end keywords (spaces ignored)
pub fn chapter_signals_end(chapter: &str) -> bool {
    let compact: String = chapter.chars().filter(|c| !c.is_whitespace()).collect();
    CHAPTER_END_KEYWORDS.iter().any(|k| compact.contains(k))
}

/// Whether an ISO-like date (`YYYY...`) is older than the start of last year
pub fn date_signals_end(update_date: &str, current_year: i32) -> bool {
    let date = update_date.trim();
    !date.is_empty() && date < (current_year - 1).to_string().as_str()
}

/// Next version code for an id whose highest stored version is `prior_max`
pub fn next_version(prior_max: i64, now_secs: i64) -> i64 {
    now_secs.max(prior_max + 1)
}

/// Last recorded failure of a book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub site: String,
    pub id: i64,
    pub error: String,
}

/// Number of latest-version books per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub error: usize,
    pub in_progress: usize,
    pub end: usize,
    pub download: usize,
}

impl StatusCount {
    /// Increment the counter of `status`
    pub fn record(&mut self, status: BookStatus) {
        match status {
            BookStatus::Error => self.error += 1,
            BookStatus::InProgress => self.in_progress += 1,
            BookStatus::End => self.end += 1,
            BookStatus::Download => self.download += 1,
        }
    }

    pub fn get(&self, status: BookStatus) -> usize {
        match status {
            BookStatus::Error => self.error,
            BookStatus::InProgress => self.in_progress,
            BookStatus::End => self.end,
            BookStatus::Download => self.download,
        }
    }
}

/// Derived statistics of one site
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Distinct book ids
    pub book_count: usize,
    /// Book rows across all versions
    pub record_count: usize,
    /// Rows in the error table
    pub error_count: usize,
    pub writer_count: usize,
    pub status_count: StatusCount,
    /// Highest id over books and errors
    pub max_id: i64,
    /// Highest id whose latest version is not in error
    pub latest_success_id: i64,
}

/// Chapter of a book being downloaded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chapter {
    pub index: usize,
    pub url: String,
    pub title: String,
    pub content: String,
    pub error: Option<String>,
}

impl Chapter {
    pub fn new(index: usize, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            index,
            url: url.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Strip leftover markup and blank lines from the content
    pub fn optimize_content(&mut self) {
        const REPLACEMENTS: &[(&str, &str)] = &[
            ("<br />", "\n"),
            ("<br/>", "\n"),
            ("<br>", "\n"),
            ("<b>", ""),
            ("</b>", ""),
            ("<p>", ""),
            ("</p>", "\n"),
            ("<p/>", "\n"),
        ];

        let mut content = self.content.clone();
        for (old, new) in REPLACEMENTS {
            content = content.replace(old, new);
        }
        let content = html_escape::decode_html_entities(&content);

        self.content = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
    }

    /// Chapter block as written to the book file
    pub fn content_string(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n",
            self.title, CONTENT_SEP, self.content, CONTENT_SEP
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in BookStatus::all() {
            assert_eq!(status.as_str().parse::<BookStatus>().unwrap(), status);
        }
        assert!("finished".parse::<BookStatus>().is_err());
    }

    #[test]
    fn test_file_name() {
        let mut book = Book::new("xbiquge", 42);
        assert_eq!(book.file_name(), "42.txt");

        book.version = 36;
        assert_eq!(book.file_name(), "42-v10.txt");
        assert_eq!(book.to_string(), "xbiquge-42-10");
    }

    #[test]
    fn test_next_version_is_strictly_greater() {
        assert_eq!(next_version(0, 1_700_000_000), 1_700_000_000);
        assert_eq!(next_version(1_700_000_000, 1_700_000_000), 1_700_000_001);
        assert_eq!(next_version(1_800_000_000, 1_700_000_000), 1_800_000_001);
    }

    #[test]
    fn test_chapter_signals_end() {
        assert!(chapter_signals_end("第一百章 大結局"));
        assert!(chapter_signals_end("完 本 感 言"));
        assert!(!chapter_signals_end("第一百章 新的開始"));
    }

    #[test]
    fn test_date_signals_end() {
        assert!(date_signals_end("2020-05-01", 2026));
        assert!(!date_signals_end("2025-01-01", 2026));
        assert!(!date_signals_end("2026-10-01", 2026));
        assert!(!date_signals_end("", 2026));
    }

    #[test]
    fn test_optimize_content() {
        let mut chapter = Chapter::new(0, "http://x/1", "第一章");
        chapter.content = String::from("<p>  line one&nbsp;</p><br />\n\n<b>line</b> two  ");
        chapter.optimize_content();
        assert_eq!(chapter.content, "line one\n\nline two");
    }

    #[test]
    fn test_content_string() {
        let mut chapter = Chapter::new(0, "", "title");
        chapter.content = String::from("body");
        assert_eq!(
            chapter.content_string(),
            format!("title\n{CONTENT_SEP}\nbody\n{CONTENT_SEP}\n")
        );
    }

    #[test]
    fn test_status_count() {
        let mut count = StatusCount::default();
        count.record(BookStatus::Error);
        count.record(BookStatus::Error);
        count.record(BookStatus::End);
        assert_eq!(count.get(BookStatus::Error), 2);
        assert_eq!(count.end, 1);
        assert_eq!(count.download, 0);
    }
}
