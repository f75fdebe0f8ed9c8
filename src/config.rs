//! Search and endpoint configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Parameters of the worker loop.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Workers read the clock once every this many iterations.
    pub time_check_interval: u64,

    /// Base seed for the per-worker random generators. Worker `i` of a run
    /// is seeded with `seed + i + 1`; single-threaded playouts use `seed`.
    pub seed: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            time_check_interval: 100,
            seed: 0x5eed,
        }
    }
}

impl SearchConfig {
    /// Checks the clock on every iteration, for short test budgets.
    pub fn for_testing() -> Self {
        Self {
            time_check_interval: 1,
            ..Self::default()
        }
    }

    pub fn with_time_check_interval(mut self, interval: u64) -> Self {
        self.time_check_interval = interval;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Where the move-probability service listens.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub addr: SocketAddr,

    /// Applied to connect, read and write. `None` blocks indefinitely.
    pub timeout: Option<Duration>,
}

impl EndpointConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
