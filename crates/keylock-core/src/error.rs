//! Lock error types

use std::time::Duration;

/// Error type for lock operations
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The store could not be reached or rejected the script. No state changed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),

    #[error("lock wait cancelled")]
    Cancelled,

    #[error("lock wait deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// The owner already holds the key at the maximum reentrant depth.
    /// No state changed.
    #[error("lock {0} is already held at the maximum reentrant depth")]
    HoldDepthExhausted(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl LockError {
    pub fn store(err: impl Into<anyhow::Error>) -> Self {
        LockError::StoreUnavailable(err.into())
    }

    /// Whether the error ended a wait without any store failure involved
    pub fn is_wait_aborted(&self) -> bool {
        matches!(self, LockError::Cancelled | LockError::DeadlineExceeded(_))
    }

    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            LockError::StoreUnavailable(_) => "store_unavailable",
            LockError::Cancelled => "cancelled",
            LockError::DeadlineExceeded(_) => "deadline_exceeded",
            LockError::HoldDepthExhausted(_) => "hold_depth_exhausted",
            LockError::InvalidArgument(_) => "invalid_argument",
            LockError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LockError::Cancelled;
        assert_eq!(err.to_string(), "lock wait cancelled");

        let err = LockError::DeadlineExceeded(Duration::from_millis(250));
        assert_eq!(err.to_string(), "lock wait deadline exceeded after 250ms");

        let err = LockError::InvalidArgument("lease must be positive".to_string());
        assert_eq!(err.to_string(), "invalid argument: lease must be positive");

        let err = LockError::HoldDepthExhausted("orders".to_string());
        assert_eq!(
            err.to_string(),
            "lock orders is already held at the maximum reentrant depth"
        );

        let err = LockError::store(anyhow::anyhow!("connection refused"));
        assert_eq!(err.to_string(), "store unavailable: connection refused");
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(LockError::Cancelled.kind(), "cancelled");
        assert!(LockError::Cancelled.is_wait_aborted());
        assert!(LockError::DeadlineExceeded(Duration::ZERO).is_wait_aborted());
        assert!(!LockError::store(anyhow::anyhow!("down")).is_wait_aborted());
    }
}
