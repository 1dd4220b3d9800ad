//! Fixed-size worker pool with a completion barrier.
//!
//! [`TileScheduler::run`] submits one job per tile coordinate in row-major
//! order and blocks until every job has reported back or the configured
//! timeout elapses. Jobs complete in any order. A job that fails or panics
//! still counts toward completion, so one bad tile never stalls the run; its
//! error lands in [`RunReport::failures`]. The scheduler never touches the
//! accumulator's freeze state.

mod latch;

use crate::source::TileCoord;
use crate::trace::{trace_event, trace_span, trace_warn};
use crate::util::sync::lock;
use crate::util::{ChangeMatrixError, ChangeMatrixResult};
use latch::CompletionLatch;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Worker pool parameters.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SchedulerConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum time to wait for all tiles; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 24,
            timeout: None,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> ChangeMatrixResult<()> {
        if self.workers == 0 {
            return Err(ChangeMatrixError::config("worker count must be positive"));
        }
        Ok(())
    }
}

/// Scheduler lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Dispatching,
    AwaitingCompletion,
    Done,
}

/// Whether every dispatched tile reported back before the wait ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Complete,
    /// The timeout elapsed; outstanding jobs keep running.
    Incomplete,
}

/// A tile whose job returned an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileFailure {
    pub coord: TileCoord,
    pub error: ChangeMatrixError,
}

/// Outcome of one scheduler run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunStatus,
    /// Tiles dispatched.
    pub total_tiles: usize,
    /// Tiles that reported back, successfully or not, before the wait ended.
    pub completed_tiles: usize,
    pub failures: Vec<TileFailure>,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }

    /// Complete and without failed tiles.
    pub fn is_success(&self) -> bool {
        self.is_complete() && self.failures.is_empty()
    }

    /// Tiles that finished without error.
    pub fn succeeded_tiles(&self) -> usize {
        self.completed_tiles - self.failures.len()
    }

    pub fn failed_coords(&self) -> Vec<TileCoord> {
        self.failures.iter().map(|f| f.coord).collect()
    }
}

/// Dispatches per-tile jobs onto a fixed-size `rayon` pool.
pub struct TileScheduler {
    pool: rayon::ThreadPool,
    cfg: SchedulerConfig,
    state: SchedulerState,
}

impl TileScheduler {
    pub fn new(cfg: SchedulerConfig) -> ChangeMatrixResult<Self> {
        cfg.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.workers)
            .thread_name(|idx| format!("changematrix-worker-{idx}"))
            .build()
            .map_err(|err| ChangeMatrixError::config(format!("worker pool: {err}")))?;
        Ok(Self {
            pool,
            cfg,
            state: SchedulerState::Idle,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.cfg
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Runs `job` once per coordinate and waits for completion.
    pub fn run<F>(&mut self, tiles: Vec<TileCoord>, job: F) -> RunReport
    where
        F: Fn(TileCoord) -> ChangeMatrixResult<()> + Send + Sync + 'static,
    {
        let total_tiles = tiles.len();
        let _span = trace_span!("schedule", tiles = total_tiles, workers = self.cfg.workers)
            .entered();

        self.state = SchedulerState::Dispatching;
        let latch = Arc::new(CompletionLatch::new(total_tiles));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let job = Arc::new(job);
        for coord in tiles {
            let latch = Arc::clone(&latch);
            let failures = Arc::clone(&failures);
            let job = Arc::clone(&job);
            self.pool.spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| (*job)(coord))).unwrap_or_else(
                    |payload| {
                        Err(ChangeMatrixError::WorkerPanicked {
                            reason: panic_message(payload.as_ref()),
                        })
                    },
                );
                if let Err(error) = outcome {
                    trace_warn!(
                        "tile_failed",
                        tile_x = coord.tile_x,
                        tile_y = coord.tile_y,
                        error = error.to_string()
                    );
                    lock(&failures).push(TileFailure { coord, error });
                }
                latch.count_down();
            });
        }

        self.state = SchedulerState::AwaitingCompletion;
        let remaining = latch.wait(self.cfg.timeout);
        self.state = SchedulerState::Done;

        let mut failures = lock(&failures).clone();
        failures.sort_by_key(|f| (f.coord.tile_y, f.coord.tile_x));
        // A failure is recorded before its tile counts down.
        let completed_tiles = (total_tiles - remaining).max(failures.len());
        let status = if remaining == 0 {
            RunStatus::Complete
        } else {
            trace_warn!("schedule_timeout", outstanding = remaining);
            RunStatus::Incomplete
        };
        trace_event!(
            "schedule_done",
            completed = completed_tiles,
            failed = failures.len()
        );
        RunReport {
            status,
            total_tiles,
            completed_tiles,
            failures,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
