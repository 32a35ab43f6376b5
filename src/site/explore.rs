//! Frontier probing with a consecutive-failure gate
//!
//! Ids are dispatched in order while `failures + in_flight < max_errors`.
//! Every in-flight probe counts as a potential failure, so when every probe
//! fails exactly `max_errors` ids past the last success are probed.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::pool::WorkerPool;

/// Outcome of one frontier run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrontierReport {
    /// Ids dispatched
    pub probed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Highest id dispatched
    pub last_id: Option<i64>,
    /// The run stopped on the failure gate rather than running out of ids
    pub halted: bool,
}

impl FrontierReport {
    fn record(&mut self, ok: bool) {
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    /// Combine the report of a later phase
    pub fn merge(&mut self, other: FrontierReport) {
        self.probed += other.probed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.last_id = other.last_id.or(self.last_id);
        self.halted = other.halted;
    }
}

/// Probe `ids` in order until they run out, the failure gate closes or
/// `cancel` fires
///
/// `failures` is the consecutive-failure counter: a successful probe resets
/// it to zero, a failed one increments it. It is shared so that several
/// phases continue the same frontier.
pub async fn run_frontier<I, F, Fut>(
    ids: I,
    max_errors: usize,
    failures: &Arc<AtomicUsize>,
    cancel: &CancellationToken,
    probe: F,
) -> FrontierReport
where
    I: IntoIterator<Item = i64>,
    F: Fn(i64) -> Fut,
    Fut: Future<Output = bool> + Send + 'static,
{
    let mut pool = WorkerPool::new();
    let mut report = FrontierReport::default();
    let mut ids = ids.into_iter();

    while !cancel.is_cancelled() {
        if failures.load(Ordering::SeqCst) + pool.len() >= max_errors {
            if pool.is_empty() {
                report.halted = true;
                break;
            }
            if let Some(ok) = pool.join_next().await {
                report.record(ok);
            }
            continue;
        }

        let Some(id) = ids.next() else {
            break;
        };

        report.probed += 1;
        report.last_id = Some(id);

        let attempt = probe(id);
        let failures = Arc::clone(failures);
        pool.spawn(async move {
            let ok = attempt.await;
            if ok {
                failures.store(0, Ordering::SeqCst);
            } else {
                failures.fetch_add(1, Ordering::SeqCst);
            }
            ok
        });
    }

    for ok in pool.drain().await {
        report.record(ok);
    }

    debug!(
        probed = report.probed,
        succeeded = report.succeeded,
        failed = report.failed,
        halted = report.halted,
        "Frontier run finished"
    );
    report
}
