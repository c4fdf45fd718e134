use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Task-level errors: recovered locally and folded into the batch report
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("task was cancelled before producing a result")]
    Cancelled,

    #[error("task did not finish within {after:?}")]
    TimedOut { after: Duration },

    #[error("task failed: {0}")]
    Failed(String),
}

impl TaskError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

// =============================================================================
// Batch-level errors: the harness cannot make progress at all
// =============================================================================

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("execution pool exhausted: {reason}")]
    PoolExhausted { reason: String },

    #[error("failed to build async runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl HarnessError {
    pub fn pool_exhausted(reason: impl Into<String>) -> Self {
        Self::PoolExhausted {
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Configuration errors
// =============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("value {value} for field '{field}' is out of range (min: {min}, max: {max})")]
    OutOfRange {
        field: String,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("invalid value '{value}' for field '{field}': {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn out_of_range(field: impl Into<String>, value: u64, min: u64, max: u64) -> Self {
        Self::OutOfRange {
            field: field.into(),
            value,
            min,
            max,
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}
