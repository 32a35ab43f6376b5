//! Property tests for the explore frontier gate

use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};

use novelcrawl::site::run_frontier;
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// With every probe failing, exactly `max_errors` ids past the start are probed
    #[test]
    fn prop_all_failures_halt_at_threshold(start in 1i64..10_000, max_errors in 1usize..50) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let failures = Arc::new(AtomicUsize::new(0));

        let report = runtime().block_on(run_frontier(
            start..,
            max_errors,
            &failures,
            &CancellationToken::new(),
            |id| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(id);
                    false
                }
            },
        ));

        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        let expected: Vec<i64> = (start..start + max_errors as i64).collect();

        prop_assert_eq!(seen, expected);
        prop_assert_eq!(report.failed, max_errors);
        prop_assert!(report.halted);
    }

    /// A run of successes is always fully probed before the gate closes
    #[test]
    fn prop_success_prefix_is_probed(successes in 0i64..40, max_errors in 1usize..10) {
        let failures = Arc::new(AtomicUsize::new(0));

        let report = runtime().block_on(run_frontier(
            1..,
            max_errors,
            &failures,
            &CancellationToken::new(),
            move |id| async move { id <= successes },
        ));

        prop_assert_eq!(report.succeeded as i64, successes);
        prop_assert!(report.failed >= max_errors);
        prop_assert!(report.halted);
    }
}
