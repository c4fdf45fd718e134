//! Scheduling strategies and the execution pools they provision.
//!
//! A [`Strategy`] is plain configuration. Calling [`Strategy::provision`]
//! produces an [`ExecutionPool`] that lives for exactly one batch:
//!
//! - `Bounded { max_concurrent }` gives a fixed set of worker contexts
//!   pulling jobs FIFO from one shared queue, the async analogue of a fixed
//!   thread pool.
//! - `Unbounded` gives one lightweight `tokio` task per job, the analogue of a
//!   virtual-thread-per-task executor.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::error::{ConfigError, HarnessError};

pub type Job = BoxFuture<'static, ()>;

// =============================================================================
// Strategy
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Bounded { max_concurrent: usize },
    Unbounded,
}

impl Strategy {
    pub const DEFAULT_POOL_SIZE: usize = 100;

    pub fn bounded(max_concurrent: usize) -> Self {
        Strategy::Bounded { max_concurrent }
    }

    pub fn unbounded() -> Self {
        Strategy::Unbounded
    }

    /// True when every task gets its own lightweight context.
    pub fn is_lightweight(&self) -> bool {
        matches!(self, Strategy::Unbounded)
    }

    pub fn provision(&self, task_count: usize) -> Result<ExecutionPool, HarnessError> {
        match *self {
            Strategy::Bounded { max_concurrent: 0 } => Err(HarnessError::pool_exhausted(
                "bounded strategy configured with zero execution contexts",
            )),
            Strategy::Bounded { max_concurrent } => {
                let workers = max_concurrent.min(task_count).max(1);
                Ok(ExecutionPool::Bounded(BoundedPool::new(workers)))
            }
            Strategy::Unbounded => Ok(ExecutionPool::PerTask(PerTaskPool::new())),
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::bounded(Self::DEFAULT_POOL_SIZE)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Bounded { max_concurrent } => write!(f, "bounded:{max_concurrent}"),
            Strategy::Unbounded => write!(f, "unbounded"),
        }
    }
}

impl FromStr for Strategy {
    type Err = ConfigError;

    /// Accepts `bounded`, `bounded:<k>` and `unbounded`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        match lowered.split_once(':') {
            None if lowered == "bounded" => Ok(Strategy::default()),
            None if lowered == "unbounded" => Ok(Strategy::Unbounded),
            Some(("bounded", size)) => size
                .trim()
                .parse::<usize>()
                .map(Strategy::bounded)
                .map_err(|err| ConfigError::invalid_value("strategy", s, err.to_string())),
            _ => Err(ConfigError::invalid_value(
                "strategy",
                s,
                "expected 'bounded', 'bounded:<size>' or 'unbounded'",
            )),
        }
    }
}

// =============================================================================
// Pools
// =============================================================================

pub enum ExecutionPool {
    Bounded(BoundedPool),
    PerTask(PerTaskPool),
}

impl ExecutionPool {
    pub async fn submit(&mut self, job: Job) -> Result<(), HarnessError> {
        match self {
            ExecutionPool::Bounded(pool) => pool.submit(job).await,
            ExecutionPool::PerTask(pool) => {
                pool.submit(job);
                Ok(())
            }
        }
    }

    /// Closes admission and waits for every context to finish.
    pub async fn shutdown(self) {
        match self {
            ExecutionPool::Bounded(pool) => pool.shutdown().await,
            ExecutionPool::PerTask(pool) => pool.shutdown().await,
        }
    }

    /// Maximum number of concurrently running jobs, `None` if unlimited.
    pub fn capacity(&self) -> Option<usize> {
        match self {
            ExecutionPool::Bounded(pool) => Some(pool.workers.len()),
            ExecutionPool::PerTask(_) => None,
        }
    }
}

async fn run_guarded(job: Job) -> bool {
    AssertUnwindSafe(job).catch_unwind().await.is_ok()
}

// -----------------------------------------------------------------------------
// Bounded: fixed workers, FIFO queue
// -----------------------------------------------------------------------------

pub struct BoundedPool {
    workers: Vec<Worker>,
    sender: Option<mpsc::Sender<Job>>,
}

struct Worker {
    id: usize,
    handle: JoinHandle<usize>,
}

impl BoundedPool {
    fn new(size: usize) -> Self {
        assert!(size > 0);

        let (sender, receiver) = mpsc::channel(size);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size)
            .map(|id| Worker::new(id, Arc::clone(&receiver)))
            .collect();

        BoundedPool {
            workers,
            sender: Some(sender),
        }
    }

    /// Blocks while the queue is full.
    async fn submit(&mut self, job: Job) -> Result<(), HarnessError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| HarnessError::pool_exhausted("pool already shut down"))?;

        sender
            .send(job)
            .await
            .map_err(|_| HarnessError::pool_exhausted("all bounded workers have exited"))
    }

    async fn shutdown(mut self) {
        drop(self.sender.take());

        for worker in std::mem::take(&mut self.workers) {
            match worker.handle.await {
                Ok(executed) => debug!(worker = worker.id, executed, "worker finished"),
                Err(err) => warn!(worker = worker.id, error = %err, "worker did not finish cleanly"),
            }
        }
    }
}

impl Drop for BoundedPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.handle.abort();
        }
    }
}

impl Worker {
    fn new(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) -> Self {
        let handle = tokio::spawn(async move {
            let mut executed = 0;
            loop {
                // Lock is released before the job runs.
                let job = receiver.lock().await.recv().await;

                match job {
                    Some(job) => {
                        if !run_guarded(job).await {
                            warn!(worker = id, "job panicked");
                        }
                        executed += 1;
                    }
                    None => break executed,
                }
            }
        });

        Worker { id, handle }
    }
}

// -----------------------------------------------------------------------------
// Unbounded: one lightweight task per job
// -----------------------------------------------------------------------------

pub struct PerTaskPool {
    set: JoinSet<bool>,
}

impl PerTaskPool {
    fn new() -> Self {
        PerTaskPool {
            set: JoinSet::new(),
        }
    }

    fn submit(&mut self, job: Job) {
        self.set.spawn(run_guarded(job));
    }

    async fn shutdown(mut self) {
        while let Some(joined) = self.set.join_next().await {
            match joined {
                Ok(true) => {}
                Ok(false) => warn!("job panicked"),
                Err(err) => warn!(error = %err, "task did not finish cleanly"),
            }
        }
    }
}
