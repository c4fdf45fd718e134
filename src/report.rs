use std::fmt;
use std::time::Duration;

use crate::error::TaskError;

/// Value reported in place of a result for any task that did not succeed.
pub const CANCELLED_SENTINEL: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub task_id: usize,
    pub outcome: Result<u32, TaskError>,
}

impl ExecutionResult {
    pub fn new(task_id: usize, outcome: Result<u32, TaskError>) -> Self {
        ExecutionResult { task_id, outcome }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> i64 {
        match self.outcome {
            Ok(value) => i64::from(value),
            Err(_) => CANCELLED_SENTINEL,
        }
    }
}

// =============================================================================
// Order-independent reduction
// =============================================================================

/// Running totals for one batch.
///
/// Owned by a single reducer; `record` and `merge` are commutative, so the
/// totals do not depend on the order in which tasks complete.
#[derive(Debug, Default)]
pub struct Accumulator {
    sum: u64,
    successes: usize,
    timed_out: usize,
    failed: usize,
    cancelled: usize,
    results: Vec<ExecutionResult>,
}

impl Accumulator {
    pub fn with_capacity(capacity: usize) -> Self {
        Accumulator {
            results: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    pub fn record(&mut self, result: ExecutionResult) {
        match &result.outcome {
            Ok(value) => {
                self.sum += u64::from(*value);
                self.successes += 1;
            }
            Err(TaskError::Cancelled) => self.cancelled += 1,
            Err(TaskError::TimedOut { .. }) => self.timed_out += 1,
            Err(TaskError::Failed(_)) => self.failed += 1,
        }
        self.results.push(result);
    }

    pub fn merge(mut self, other: Accumulator) -> Accumulator {
        self.sum += other.sum;
        self.successes += other.successes;
        self.timed_out += other.timed_out;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
        self.results.extend(other.results);
        self
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn sum(&self) -> u64 {
        self.sum
    }

    /// Every non-successful outcome: cancelled, timed out or failed.
    pub fn cancellations(&self) -> usize {
        self.cancelled + self.timed_out + self.failed
    }

    pub fn task_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.results.iter().map(|r| r.task_id)
    }

    pub fn finish(mut self, elapsed: Duration) -> BatchReport {
        self.results.sort_by_key(|r| r.task_id);
        BatchReport {
            sum: self.sum,
            successes: self.successes,
            cancellations: self.cancellations(),
            timed_out: self.timed_out,
            failed: self.failed,
            elapsed,
            results: self.results,
        }
    }
}

impl Extend<ExecutionResult> for Accumulator {
    fn extend<I: IntoIterator<Item = ExecutionResult>>(&mut self, iter: I) {
        for result in iter {
            self.record(result);
        }
    }
}

impl FromIterator<ExecutionResult> for Accumulator {
    fn from_iter<I: IntoIterator<Item = ExecutionResult>>(iter: I) -> Self {
        let mut acc = Accumulator::default();
        acc.extend(iter);
        acc
    }
}

// =============================================================================
// Batch report
// =============================================================================

#[derive(Debug, Clone)]
pub struct BatchReport {
    sum: u64,
    successes: usize,
    cancellations: usize,
    timed_out: usize,
    failed: usize,
    elapsed: Duration,
    results: Vec<ExecutionResult>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn sum(&self) -> u64 {
        self.sum
    }

    pub fn successes(&self) -> usize {
        self.successes
    }

    pub fn cancellations(&self) -> usize {
        self.cancellations
    }

    pub fn timed_out(&self) -> usize {
        self.timed_out
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Per-task results, sorted by task id.
    pub fn results(&self) -> &[ExecutionResult] {
        &self.results
    }

    /// Completed tasks per second of wall-clock time.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.total() as f64 / secs
        }
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tasks: sum = {}, succeeded = {}, cancelled = {} (timed out {}, failed {}), elapsed = {} ms",
            self.total(),
            self.sum,
            self.successes,
            self.cancellations,
            self.timed_out,
            self.failed,
            self.elapsed.as_millis()
        )
    }
}
