use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::harness::RunOptions;
use crate::strategy::Strategy;
use crate::task::Task;

const MAX_POOL_SIZE: u64 = 100_000;
const MAX_WORKER_THREADS: u64 = 1_024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub runtime: RuntimeConfig,
    pub batch: BatchConfig,
}

/// Carrier threads backing the async runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub worker_threads: usize,
    pub thread_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Bounded,
    Unbounded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    pub task_count: usize,
    pub delay_ms: u64,
    pub strategy: StrategyKind,
    pub pool_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_timeout_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_threads: num_cpus::get(),
            thread_name: "harness-worker".to_string(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            task_count: 1_000,
            delay_ms: 1_000,
            strategy: StrategyKind::Bounded,
            pool_size: Strategy::DEFAULT_POOL_SIZE,
            deadline_ms: None,
            task_timeout_ms: None,
        }
    }
}

impl HarnessConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: HarnessConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runtime.validate()?;
        if self.batch.strategy == StrategyKind::Bounded {
            check_range("batch.pool_size", self.batch.pool_size as u64, 1, MAX_POOL_SIZE)?;
        }
        if let Some(deadline) = self.batch.deadline_ms {
            check_range("batch.deadline_ms", deadline, 1, u64::MAX)?;
        }
        if let Some(limit) = self.batch.task_timeout_ms {
            check_range("batch.task_timeout_ms", limit, 1, u64::MAX)?;
        }
        Ok(())
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "runtime.worker_threads",
            self.worker_threads as u64,
            1,
            MAX_WORKER_THREADS,
        )?;
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "runtime.thread_name",
                &self.thread_name,
                "must not be empty",
            ));
        }
        Ok(())
    }
}

impl BatchConfig {
    pub fn strategy(&self) -> Strategy {
        match self.strategy {
            StrategyKind::Bounded => Strategy::bounded(self.pool_size),
            StrategyKind::Unbounded => Strategy::Unbounded,
        }
    }

    pub fn set_strategy(&mut self, strategy: Strategy) {
        match strategy {
            Strategy::Bounded { max_concurrent } => {
                self.strategy = StrategyKind::Bounded;
                self.pool_size = max_concurrent;
            }
            Strategy::Unbounded => self.strategy = StrategyKind::Unbounded,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            deadline: self.deadline_ms.map(Duration::from_millis),
            task_timeout: self.task_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn tasks(&self) -> Vec<Task> {
        Task::batch(self.task_count, self.delay())
    }
}

fn check_range(field: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::out_of_range(field, value, min, max));
    }
    Ok(())
}
