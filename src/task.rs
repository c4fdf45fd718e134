use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TaskError;

/// Exclusive upper bound for values a task may produce.
pub const VALUE_BOUND: u32 = 100;

type Work = Arc<dyn Fn(usize) -> Result<u32, String> + Send + Sync>;

/// A simulated call to a slow remote service: wait, then answer with a number.
#[derive(Clone)]
pub struct Task {
    id: usize,
    delay: Duration,
    work: Work,
}

impl Task {
    /// Task answering with a random number in `[0, 100)`.
    pub fn new(id: usize, delay: Duration) -> Self {
        Self::with_work(id, delay, |_| Ok(rand::thread_rng().gen_range(0..VALUE_BOUND)))
    }

    pub fn with_work<F>(id: usize, delay: Duration, work: F) -> Self
    where
        F: Fn(usize) -> Result<u32, String> + Send + Sync + 'static,
    {
        Task {
            id,
            delay,
            work: Arc::new(work),
        }
    }

    /// `count` random tasks with ids `0..count`.
    pub fn batch(count: usize, delay: Duration) -> Vec<Task> {
        (0..count).map(|id| Task::new(id, delay)).collect()
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Sleeps for the configured delay, then computes the result.
    ///
    /// The delay is the only suspension point; a cancelled `token` is observed
    /// there and the task exits with [`TaskError::Cancelled`].
    pub async fn execute(&self, token: &CancellationToken) -> Result<u32, TaskError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(task = self.id, "task cancelled");
                return Err(TaskError::Cancelled);
            }
            _ = tokio::time::sleep(self.delay) => {}
        }

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| (self.work)(self.id))) {
            Ok(Ok(value)) if value < VALUE_BOUND => Ok(value),
            Ok(Ok(value)) => Err(TaskError::failed(format!(
                "value {value} outside [0, {VALUE_BOUND})"
            ))),
            Ok(Err(reason)) => Err(TaskError::Failed(reason)),
            Err(payload) => Err(TaskError::Failed(panic_message(payload.as_ref()))),
        };

        if let Err(err) = &outcome {
            debug!(task = self.id, error = %err, "task failed");
        }
        outcome
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}
