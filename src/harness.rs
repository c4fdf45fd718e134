use std::collections::HashSet;
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{HarnessConfig, RuntimeConfig};
use crate::error::{HarnessError, TaskError};
use crate::report::{Accumulator, BatchReport, ExecutionResult};
use crate::strategy::Strategy;
use crate::task::Task;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Total budget for the batch; still-pending tasks are cancelled when it expires.
    pub deadline: Option<Duration>,
    /// Budget for a single task, counted from the moment it starts executing.
    pub task_timeout: Option<Duration>,
}

impl RunOptions {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_task_timeout(mut self, limit: Duration) -> Self {
        self.task_timeout = Some(limit);
        self
    }
}

// =============================================================================
// Blocking front-end owning its runtime
// =============================================================================

pub struct Harness {
    runtime: Runtime,
    options: RunOptions,
}

impl Harness {
    pub fn new() -> Result<Self, HarnessError> {
        Self::with_runtime_config(&RuntimeConfig::default())
    }

    pub fn with_runtime_config(config: &RuntimeConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()?;

        Ok(Harness {
            runtime,
            options: RunOptions::default(),
        })
    }

    pub fn from_config(config: &HarnessConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        Ok(Self::with_runtime_config(&config.runtime)?.with_options(config.batch.run_options()))
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Runs one batch to completion on the harness runtime.
    pub fn run(&self, tasks: Vec<Task>, strategy: Strategy) -> Result<BatchReport, HarnessError> {
        self.runtime
            .block_on(run_batch(tasks, &strategy, &self.options))
    }
}

// =============================================================================
// Async core
// =============================================================================

/// Submits every task under `strategy`, waits for all of them and reduces
/// their outcomes.
///
/// Individual task failures, timeouts and cancellations are folded into the
/// report. The only error is a pool that cannot run anything at all.
pub async fn run_batch(
    tasks: Vec<Task>,
    strategy: &Strategy,
    options: &RunOptions,
) -> Result<BatchReport, HarnessError> {
    let start = Instant::now();
    let total = tasks.len();
    let ids: Vec<usize> = tasks.iter().map(Task::id).collect();
    info!(tasks = total, %strategy, "starting batch");

    let mut pool = strategy.provision(total)?;
    let token = CancellationToken::new();
    let task_timeout = options.task_timeout;

    let (tx, mut rx) = mpsc::unbounded_channel::<ExecutionResult>();

    let root = token.clone();
    let dispatch = async move {
        for task in tasks {
            let tx = tx.clone();
            let token = root.child_token();
            let job = async move {
                let outcome = execute_task(&task, &token, task_timeout).await;
                // Receiver only goes away once every sender is gone.
                let _ = tx.send(ExecutionResult::new(task.id(), outcome));
            };
            pool.submit(job.boxed()).await?;
        }
        drop(tx);
        pool.shutdown().await;
        Ok::<(), HarnessError>(())
    };

    let reduce = async {
        let mut acc = Accumulator::with_capacity(total);
        while let Some(result) = rx.recv().await {
            acc.record(result);
        }
        acc
    };

    // The deadline is raced in place, so dropping this future drops the timer too.
    let work = async { tokio::join!(dispatch, reduce) };
    tokio::pin!(work);
    let (dispatched, mut acc) = match options.deadline {
        None => work.await,
        Some(limit) => match timeout(limit, &mut work).await {
            Ok(done) => done,
            Err(_) => {
                info!(deadline_ms = limit.as_millis() as u64, "deadline reached, cancelling pending tasks");
                token.cancel();
                work.await
            }
        },
    };
    dispatched?;

    if acc.len() < total {
        fill_missing(&mut acc, &ids, token.is_cancelled());
    }

    let report = acc.finish(start.elapsed());
    info!(
        sum = report.sum(),
        cancelled = report.cancellations(),
        elapsed_ms = report.elapsed().as_millis() as u64,
        "batch finished"
    );
    Ok(report)
}

async fn execute_task(
    task: &Task,
    token: &CancellationToken,
    limit: Option<Duration>,
) -> Result<u32, TaskError> {
    let Some(after) = limit else {
        return task.execute(token).await;
    };

    match timeout(after, task.execute(token)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            debug!(task = task.id(), ?after, "task timed out");
            Err(TaskError::TimedOut { after })
        }
    }
}

/// Records an outcome for every task whose job never reported back.
///
/// Defensive: jobs always report on normal paths, since pool contexts catch
/// panics. This only fires for a job lost to an aborted context.
fn fill_missing(acc: &mut Accumulator, ids: &[usize], cancelled: bool) {
    let seen: HashSet<usize> = acc.task_ids().collect();
    let missing: Vec<usize> = ids.iter().copied().filter(|id| !seen.contains(id)).collect();

    for id in missing {
        let outcome = if cancelled {
            TaskError::Cancelled
        } else {
            TaskError::failed("no result reported")
        };
        acc.record(ExecutionResult::new(id, Err(outcome)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;

    fn fixed_tasks(count: usize, delay: Duration) -> Vec<Task> {
        (0..count)
            .map(|id| Task::with_work(id, delay, |id| Ok((id % 100) as u32)))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_batch() {
        let report = run_batch(Vec::new(), &Strategy::default(), &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.total(), 0);
        assert_eq!(report.sum(), 0);
        assert_eq!(report.cancellations(), 0);
        assert!(report.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_pool_runs_in_waves() {
        let tasks = Task::batch(1_000, Duration::from_secs(1));
        let report = run_batch(tasks, &Strategy::bounded(100), &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.total(), 1_000);
        assert_eq!(report.successes(), 1_000);
        assert!(report.elapsed() >= Duration::from_secs(10));
        assert!(report.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_finishes_in_one_delay() {
        let tasks = Task::batch(1_000, Duration::from_secs(1));
        let report = run_batch(tasks, &Strategy::Unbounded, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.successes(), 1_000);
        assert!(report.elapsed() >= Duration::from_secs(1));
        assert!(report.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sum_is_deterministic_across_strategies() {
        let expected: u64 = (0..500u64).map(|id| id % 100).sum();

        for strategy in [Strategy::bounded(7), Strategy::bounded(1), Strategy::Unbounded] {
            let tasks = fixed_tasks(500, Duration::from_millis(10));
            let report = run_batch(tasks, &strategy, &RunOptions::default())
                .await
                .unwrap();
            assert_eq!(report.sum(), expected, "strategy {strategy}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_lower_bound() {
        for (count, size) in [(10, 3), (25, 5), (7, 10), (1, 1)] {
            let delay = Duration::from_millis(100);
            let report = run_batch(
                fixed_tasks(count, delay),
                &Strategy::bounded(size),
                &RunOptions::default(),
            )
            .await
            .unwrap();

            let waves = count.div_ceil(size) as u32;
            assert!(report.elapsed() >= delay * waves, "{count} tasks on {size} contexts");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_pending_tasks() {
        let tasks = Task::batch(1_000, Duration::from_secs(1));
        let options = RunOptions::default().with_deadline(Duration::from_millis(3_500));
        let report = run_batch(tasks, &Strategy::bounded(100), &options)
            .await
            .unwrap();

        assert_eq!(report.total(), 1_000);
        assert_eq!(report.successes(), 300);
        assert_eq!(report.cancellations(), 700);
        assert_eq!(report.successes() + report.cancellations(), 1_000);
        assert!(report.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_keeps_completed_results() {
        let tasks: Vec<Task> = (0..100)
            .map(|id| {
                let delay = if id % 2 == 0 {
                    Duration::from_secs(1)
                } else {
                    Duration::from_secs(5)
                };
                Task::with_work(id, delay, |_| Ok(1))
            })
            .collect();
        let options = RunOptions::default().with_deadline(Duration::from_secs(3));
        let report = run_batch(tasks, &Strategy::Unbounded, &options).await.unwrap();

        assert_eq!(report.sum(), 50);
        assert_eq!(report.successes(), 50);
        assert_eq!(report.cancellations(), 50);
        for result in report.results() {
            assert_eq!(result.is_success(), result.task_id % 2 == 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_timeout_marks_timed_out() {
        let mut tasks = fixed_tasks(10, Duration::from_secs(2));
        tasks.extend((10..20).map(|id| Task::with_work(id, Duration::from_millis(100), |_| Ok(3))));

        let options = RunOptions::default().with_task_timeout(Duration::from_secs(1));
        let report = run_batch(tasks, &Strategy::Unbounded, &options).await.unwrap();

        assert_eq!(report.timed_out(), 10);
        assert_eq!(report.successes(), 10);
        assert_eq!(report.sum(), 30);
        assert!(report.results()[..10]
            .iter()
            .all(|r| matches!(r.outcome, Err(TaskError::TimedOut { .. }))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_tasks_do_not_abort_siblings() {
        let tasks: Vec<Task> = (0..20)
            .map(|id| {
                Task::with_work(id, Duration::from_millis(50), |id| match id % 4 {
                    0 => Err(format!("task {id} rejected")),
                    1 => panic!("task {id} crashed"),
                    _ => Ok(2),
                })
            })
            .collect();

        for strategy in [Strategy::bounded(3), Strategy::Unbounded] {
            let report = run_batch(tasks.clone(), &strategy, &RunOptions::default())
                .await
                .unwrap();

            assert_eq!(report.failed(), 10);
            assert_eq!(report.successes(), 10);
            assert_eq!(report.sum(), 20);
            assert_eq!(report.results()[0].value(), crate::report::CANCELLED_SENTINEL);
        }
    }

    #[tokio::test]
    async fn test_zero_contexts_is_fatal() {
        let result = run_batch(
            Task::batch(5, Duration::ZERO),
            &Strategy::bounded(0),
            &RunOptions::default(),
        )
        .await;

        assert!(matches!(result, Err(HarnessError::PoolExhausted { .. })));
    }

    #[test]
    fn test_fill_missing_uses_cancellation_state() {
        let mut acc = Accumulator::default();
        acc.record(ExecutionResult::new(1, Ok(9)));

        fill_missing(&mut acc, &[0, 1, 2], true);
        let report = acc.finish(Duration::ZERO);
        assert_eq!(report.total(), 3);
        assert_eq!(report.results()[0].outcome, Err(TaskError::Cancelled));

        let mut acc = Accumulator::default();
        fill_missing(&mut acc, &[4], false);
        assert_eq!(acc.finish(Duration::ZERO).failed(), 1);
    }

    #[test]
    fn test_invalid_runtime_config_is_an_error() {
        let zero = RuntimeConfig {
            worker_threads: 0,
            ..RuntimeConfig::default()
        };
        let err = Harness::with_runtime_config(&zero).err().unwrap();
        assert!(matches!(
            err,
            HarnessError::Config(ConfigError::OutOfRange { ref field, value: 0, .. })
                if field == "runtime.worker_threads"
        ));

        let unnamed = RuntimeConfig {
            worker_threads: 1,
            thread_name: String::new(),
        };
        assert!(matches!(
            Harness::with_runtime_config(&unnamed),
            Err(HarnessError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_batch_leaves_no_tasks_behind() {
        let tasks = Task::batch(50, Duration::from_secs(10));
        let options = RunOptions::default().with_deadline(Duration::from_secs(60));

        let abandoned = timeout(
            Duration::from_secs(1),
            run_batch(tasks, &Strategy::Unbounded, &options),
        )
        .await;
        assert!(abandoned.is_err());

        // Let the runtime reap the aborted contexts.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(tokio::runtime::Handle::current().metrics().num_alive_tasks(), 0);
    }

    #[test]
    fn test_blocking_run_on_owned_runtime() {
        let config = RuntimeConfig {
            worker_threads: 2,
            thread_name: "test-carrier".to_string(),
        };
        let harness = Harness::with_runtime_config(&config).unwrap();

        let report = harness
            .run(fixed_tasks(20, Duration::from_millis(20)), Strategy::bounded(5))
            .unwrap();

        assert_eq!(report.successes(), 20);
        assert!(report.elapsed() >= Duration::from_millis(80));
    }
}
