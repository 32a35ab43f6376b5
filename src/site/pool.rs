//! Worker pool over a tokio `JoinSet`

use std::future::Future;

use tokio::task::JoinSet;
use tracing::error;

/// Spawned tasks whose results are collected as they finish
pub struct WorkerPool<T> {
    tasks: JoinSet<T>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
        }
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Tasks spawned and not yet joined
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the next task; panicked tasks are logged and skipped
    pub async fn join_next(&mut self) -> Option<T> {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(value) => return Some(value),
                Err(err) => error!(error = %err, "Worker task failed"),
            }
        }
        None
    }

    /// Wait for every remaining task
    pub async fn drain(&mut self) -> Vec<T> {
        let mut results = Vec::with_capacity(self.tasks.len());
        while let Some(value) = self.join_next().await {
            results.push(value);
        }
        results
    }
}

impl<T: Send + 'static> Default for WorkerPool<T> {
    fn default() -> Self {
        Self::new()
    }
}
