//! Process-wide state shared by every site

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::stage::StageTracker;

/// Shared crawl context: process-wide request budget, cancellation and stage markers
#[derive(Debug, Clone)]
pub struct CrawlContext {
    pub global_slots: Arc<Semaphore>,
    pub cancel: CancellationToken,
    pub stages: Arc<StageTracker>,
}

impl CrawlContext {
    /// Create a context allowing `max_threads` concurrent requests across all sites
    pub fn new(max_threads: usize) -> Self {
        Self {
            global_slots: Arc::new(Semaphore::new(max_threads.max(1))),
            cancel: CancellationToken::new(),
            stages: Arc::new(StageTracker::new()),
        }
    }

    /// Stop admitting new requests
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
