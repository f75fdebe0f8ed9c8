//! Hooks through which the engine reports what its workers are doing.

use std::error::Error;
use std::time::Duration;

use tracing::{debug, error};

/// Receives lifecycle events from a [`TreeManager`](crate::TreeManager).
///
/// All methods default to doing nothing. Calls arrive concurrently from
/// every worker thread.
pub trait SearchObserver: Send + Sync {
    fn on_tree_created(&self, _child_capacity: usize) {}

    fn on_run_start(&self, _threads: usize, _time_limit: Duration) {}

    fn on_worker_start(&self, _worker: usize) {}

    /// The worker's `iteration`-th iteration failed and the worker stops.
    fn on_worker_error(&self, _worker: usize, _iteration: u64, _error: &(dyn Error + 'static)) {}

    fn on_worker_finish(&self, _worker: usize, _iterations: u64, _playouts: u64, _elapsed: Duration) {}

    fn on_run_finish(&self, _iterations: u64, _playouts: u64, _elapsed: Duration) {}
}

/// Forwards every event to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl SearchObserver for TracingObserver {
    fn on_tree_created(&self, child_capacity: usize) {
        debug!(child_capacity, "search tree established");
    }

    fn on_run_start(&self, threads: usize, time_limit: Duration) {
        debug!(threads, time_limit_ms = time_limit.as_millis() as u64, "starting search");
    }

    fn on_worker_start(&self, worker: usize) {
        debug!(worker, "worker started");
    }

    fn on_worker_error(&self, worker: usize, iteration: u64, error: &(dyn Error + 'static)) {
        error!(worker, iteration, %error, "worker stopped by a failed iteration");
    }

    fn on_worker_finish(&self, worker: usize, iterations: u64, playouts: u64, elapsed: Duration) {
        debug!(
            worker,
            iterations,
            playouts,
            elapsed_ms = elapsed.as_millis() as u64,
            "worker finished"
        );
    }

    fn on_run_finish(&self, iterations: u64, playouts: u64, elapsed: Duration) {
        debug!(
            iterations,
            playouts,
            elapsed_ms = elapsed.as_millis() as u64,
            "search finished"
        );
    }
}
