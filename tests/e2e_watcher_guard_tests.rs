//! The watcher's worker-process guard, isolated in its own binary because it
//! mutates the process environment.

mod common;

use common::TestHarness;
use tarantella_import_server::watcher::{InboxWatcher, WORKER_GUARD_ENV};

#[test]
fn test_watcher_refuses_to_run_under_worker_process() {
    std::env::set_var(WORKER_GUARD_ENV, "1");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let result = runtime.block_on(async {
        let harness = TestHarness::new();
        InboxWatcher::start(harness.env.clone(), harness.dispatcher.clone())
    });

    std::env::remove_var(WORKER_GUARD_ENV);
    assert!(result.is_err());
}
