use thiserror::Error;

use crate::task::{TaskId, TaskStatus};

/// Errors returned by the task registry
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("cannot {action} task in status {from}")]
    InvalidTransition { from: TaskStatus, action: &'static str },

    #[error("task {0} not found")]
    NotFound(TaskId),
}

/// Errors returned by an exchange client call
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ExchangeError {
    /// Expired or invalid credential, regardless of the local clock
    pub fn is_auth(&self) -> bool {
        matches!(self, ExchangeError::Unauthorized(_))
    }

    /// Worth retrying on the next poll cycle
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ExchangeError::RateLimited(_)
                | ExchangeError::Timeout
                | ExchangeError::Network(_)
                | ExchangeError::Api(_)
        )
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ExchangeError::Timeout
        } else if e.is_decode() {
            ExchangeError::Decode(e.to_string())
        } else {
            ExchangeError::Network(e.to_string())
        }
    }
}

/// How a strategy poll cycle failed
#[derive(Debug, Clone, Error)]
pub enum StrategyError {
    /// Logged, retried next poll, task stays running
    #[error("{0}")]
    Recoverable(String),

    /// Placement skipped this cycle; escalates after repeated occurrences
    #[error("credential expired: {0}")]
    CredentialExpired(String),

    /// Moves the task to error, no further polling
    #[error("{0}")]
    Fatal(String),

    /// Stop was observed; the worker exits without further calls
    #[error("cancelled")]
    Cancelled,
}

impl From<ExchangeError> for StrategyError {
    fn from(e: ExchangeError) -> Self {
        if e.is_auth() {
            StrategyError::CredentialExpired(e.to_string())
        } else if e.is_recoverable() {
            StrategyError::Recoverable(e.to_string())
        } else {
            StrategyError::Fatal(e.to_string())
        }
    }
}
