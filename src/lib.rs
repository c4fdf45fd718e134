//! # Task Harness
//!
//! Runs a batch of simulated slow calls under one of two scheduling strategies
//! and reports how long the whole batch took:
//!
//! 1. **Bounded** - a fixed set of worker contexts fed FIFO from a queue, the
//!    classic fixed-size thread pool.
//! 2. **Unbounded** - one lightweight `tokio` task per call, so a batch of N
//!    tasks that each wait D finishes in roughly D regardless of N.
//!
//! ```no_run
//! use std::time::Duration;
//! use task_harness::{Harness, Strategy, Task};
//!
//! let harness = Harness::new()?;
//! let report = harness.run(Task::batch(1_000, Duration::from_secs(1)), Strategy::bounded(100))?;
//! println!("{report}");
//! # Ok::<(), task_harness::HarnessError>(())
//! ```
//!
//! ## Key Dependencies
//!
//! - `tokio` / `tokio-util` - runtime, timers, channels and cancellation tokens
//! - `thiserror` - error enums
//! - `serde` / `toml` - configuration files
//! - `tracing` - structured logging

pub mod config;
pub mod error;
pub mod harness;
pub mod logging;
pub mod report;
pub mod strategy;
pub mod task;

pub use config::{BatchConfig, HarnessConfig, RuntimeConfig, StrategyKind};
pub use error::{ConfigError, HarnessError, TaskError};
pub use harness::{run_batch, Harness, RunOptions};
pub use report::{Accumulator, BatchReport, ExecutionResult, CANCELLED_SENTINEL};
pub use strategy::{ExecutionPool, Strategy};
pub use task::Task;
