//! Named stage markers for progress observability

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tracing::info;

/// Current stage of every site
#[derive(Debug, Default)]
pub struct StageTracker {
    stages: Mutex<BTreeMap<String, String>>,
}

/// Marks a stage as running until dropped
#[derive(Debug)]
pub struct StageGuard {
    tracker: Arc<StageTracker>,
    site: String,
    stage: String,
    started: Instant,
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `stage` as running for `site`
    pub fn enter(self: &Arc<Self>, site: &str, stage: &str) -> StageGuard {
        let marker = format!("{site}.{stage}");
        info!(site, stage, "[{marker}] start");

        self.stages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(site.to_string(), stage.to_string());

        StageGuard {
            tracker: Arc::clone(self),
            site: site.to_string(),
            stage: stage.to_string(),
            started: Instant::now(),
        }
    }

    /// Stage currently running for `site`
    pub fn current(&self, site: &str) -> Option<String> {
        self.stages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(site)
            .cloned()
    }

    /// Every running stage keyed by site
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.stages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let mut stages = self
            .tracker
            .stages
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if stages.get(&self.site) == Some(&self.stage) {
            stages.remove(&self.site);
        }

        info!(
            site = %self.site,
            stage = %self.stage,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "[{}.{}] complete",
            self.site,
            self.stage
        );
    }
}
