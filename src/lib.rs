//! A concurrent UCT search for Go.
//!
//! The engine is split in two. [`SearchTree`] and [`TreeManager`] know how to
//! store nodes and how to drive worker threads, but nothing about the game.
//! A [`TreePolicy`] supplies the algorithm: which leaf to expand, how to
//! simulate it, and which root child to play. [`UctPolicy`] is the policy
//! used for Go, expanding moves proposed by a remote move-probability
//! service and scoring leaves with a rollout engine.

pub mod atomics;
pub mod board;
pub mod config;
pub mod evaluation;
pub mod observer;
mod search_tree;
pub mod tree_policy;

pub use board::{Board, Player, Point, PositionStatus, Rollout};
pub use config::{EndpointConfig, SearchConfig};
pub use evaluation::{EvaluationClient, EvaluationError, MoveEvaluator};
pub use observer::{SearchObserver, TracingObserver};
pub use search_tree::*;
pub use tree_policy::{PolicyRng, TreePolicy, UctNodeData, UctPolicy};

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Errors reported by [`TreeManager::run`] itself, as opposed to errors
/// raised by the policy inside one worker.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("at least one worker thread is required")]
    NoWorkers,

    #[error("all {workers} workers failed before completing a playout: {first_error}")]
    AllWorkersFailed { workers: usize, first_error: String },

    #[error("the worker scope was torn down by a panic")]
    ScopePanicked,
}

/// How a single worker thread ended.
#[derive(Debug)]
pub enum WorkerOutcome<E> {
    /// The time budget ran out.
    Finished,
    /// The policy returned an error; the worker stopped at that iteration.
    Failed(E),
    /// The worker panicked.
    Panicked,
}

#[derive(Debug)]
pub struct WorkerReport<E> {
    pub worker: usize,
    pub iterations: u64,
    pub playouts: u64,
    pub elapsed: Duration,
    pub outcome: WorkerOutcome<E>,
}

impl<E> WorkerReport<E> {
    fn new(worker: usize) -> Self {
        Self {
            worker,
            iterations: 0,
            playouts: 0,
            elapsed: Duration::default(),
            outcome: WorkerOutcome::Finished,
        }
    }

    pub fn is_failed(&self) -> bool {
        !matches!(self.outcome, WorkerOutcome::Finished)
    }

    pub fn error(&self) -> Option<&E> {
        match self.outcome {
            WorkerOutcome::Failed(ref err) => Some(err),
            _ => None,
        }
    }
}

/// Summary of one call to [`TreeManager::run`].
#[derive(Debug)]
pub struct RunStats<E> {
    pub workers: Vec<WorkerReport<E>>,
    pub elapsed: Duration,
}

impl<E> RunStats<E> {
    pub fn iterations(&self) -> u64 {
        self.workers.iter().map(|w| w.iterations).sum()
    }

    pub fn playouts(&self) -> u64 {
        self.workers.iter().map(|w| w.playouts).sum()
    }

    pub fn failed_workers(&self) -> impl Iterator<Item = &WorkerReport<E>> {
        self.workers.iter().filter(|w| w.is_failed())
    }

    /// A run is degraded when some worker stopped before the budget expired.
    pub fn is_degraded(&self) -> bool {
        self.failed_workers().next().is_some()
    }
}

pub struct TreeManager<P: TreePolicy> {
    search_tree: SearchTree<P>,
    config: SearchConfig,
    observer: Arc<dyn SearchObserver>,
    // thread local data when we have no asynchronous workers
    single_threaded_tld: Option<P::ThreadLocalData>,
}

impl<P: TreePolicy> TreeManager<P> {
    /// Builds the root and runs the bootstrap simulation on it, so that the
    /// root is eligible for selection before any worker starts.
    pub fn new(policy: P, config: SearchConfig) -> Result<Self, P::Error> {
        Self::with_observer(policy, config, Arc::new(TracingObserver))
    }

    pub fn with_observer(
        policy: P,
        config: SearchConfig,
        observer: Arc<dyn SearchObserver>,
    ) -> Result<Self, P::Error> {
        let search_tree = SearchTree::new(policy);
        let mut tld = search_tree.policy().thread_local_data(config.seed);
        search_tree.bootstrap(&mut tld)?;
        observer.on_tree_created(search_tree.child_capacity());

        Ok(Self {
            search_tree,
            config,
            observer,
            single_threaded_tld: Some(tld),
        })
    }

    pub fn tree(&self) -> &SearchTree<P> {
        &self.search_tree
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Runs one iteration on the calling thread. Returns whether a leaf was
    /// expanded and simulated.
    pub fn playout(&mut self) -> Result<bool, P::Error> {
        let search_tree = &self.search_tree;
        let seed = self.config.seed;
        let tld = self
            .single_threaded_tld
            .get_or_insert_with(|| search_tree.policy().thread_local_data(seed));
        search_tree.playout(tld)
    }

    /// Runs `n` iterations on the calling thread, returning how many of them
    /// produced a leaf.
    pub fn playout_n(&mut self, n: u64) -> Result<u64, P::Error> {
        let mut playouts = 0;
        for _ in 0..n {
            if self.playout()? {
                playouts += 1;
            }
        }
        Ok(playouts)
    }

    /// Searches with `num_threads` workers until `time_limit` has elapsed.
    ///
    /// Workers look at the clock every `time_check_interval` iterations,
    /// starting with their first one, so a zero budget performs no work.
    /// A worker whose iteration fails stops; the others keep going.
    pub fn run(
        &mut self,
        num_threads: usize,
        time_limit: Duration,
    ) -> Result<RunStats<P::Error>, SearchError> {
        if num_threads == 0 {
            return Err(SearchError::NoWorkers);
        }
        self.observer.on_run_start(num_threads, time_limit);

        let start = Instant::now();
        let check_interval = self.config.time_check_interval.max(1);
        let base_seed = self.config.seed;
        let search_tree = &self.search_tree;
        let observer = &*self.observer;

        let workers = crossbeam::scope(|scope| {
            let handles: Vec<_> = (0..num_threads)
                .map(|worker| {
                    scope.spawn(move |_| {
                        let seed = base_seed.wrapping_add(worker as u64 + 1);
                        let mut tld = search_tree.policy().thread_local_data(seed);
                        let mut report = WorkerReport::new(worker);
                        observer.on_worker_start(worker);

                        loop {
                            if report.iterations % check_interval == 0
                                && start.elapsed() >= time_limit
                            {
                                break;
                            }
                            report.iterations += 1;

                            match search_tree.playout(&mut tld) {
                                Ok(true) => report.playouts += 1,
                                Ok(false) => {}
                                Err(err) => {
                                    observer.on_worker_error(worker, report.iterations, &err);
                                    report.outcome = WorkerOutcome::Failed(err);
                                    break;
                                }
                            }
                        }

                        report.elapsed = start.elapsed();
                        observer.on_worker_finish(
                            worker,
                            report.iterations,
                            report.playouts,
                            report.elapsed,
                        );
                        report
                    })
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(worker, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        let mut report = WorkerReport::new(worker);
                        report.outcome = WorkerOutcome::Panicked;
                        report
                    })
                })
                .collect::<Vec<_>>()
        })
        .map_err(|_| SearchError::ScopePanicked)?;

        let stats = RunStats {
            workers,
            elapsed: start.elapsed(),
        };
        self.observer
            .on_run_finish(stats.iterations(), stats.playouts(), stats.elapsed);

        if stats.playouts() == 0 && stats.workers.iter().all(|w| w.is_failed()) {
            let first_error = stats
                .workers
                .iter()
                .find_map(|w| w.error().map(|err| err.to_string()))
                .unwrap_or_else(|| "worker panicked".to_string());
            return Err(SearchError::AllWorkersFailed {
                workers: num_threads,
                first_error,
            });
        }
        Ok(stats)
    }

    /// The index of the root child the policy would play, or `None` if the
    /// root was never expanded.
    pub fn result_index(&self) -> Option<usize> {
        self.search_tree.result_index()
    }

    pub fn result_node(&self) -> Option<&SearchNode<P::NodeData>> {
        self.search_tree.result_node()
    }

    pub fn principal_variation(&self, max_len: usize) -> Vec<&SearchNode<P::NodeData>> {
        self.search_tree.principal_variation(max_len)
    }

    pub fn write_dot<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        self.search_tree.write_dot(out)
    }
}
