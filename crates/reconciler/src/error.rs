//! Error types for the reconciler crate.

use std::time::Duration;

use sempex_core::ObjectKey;
use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
///
/// A resource that no longer exists is not an error; the pass reports it as
/// `PassAction::Deleted` instead.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The certificate source was unreachable or returned unusable data.
    #[error("certificate fetch failed: {reason}")]
    Fetch { reason: String },

    /// The stored object changed between load and update.
    #[error("update of '{key}' conflicted with a concurrent write: {reason}")]
    Conflict { key: ObjectKey, reason: String },

    /// Any other failure reported by the resource store.
    #[error("store operation on '{key}' failed: {reason}")]
    Store { key: ObjectKey, reason: String },

    /// The invocation was cancelled before the pass finished.
    #[error("reconciliation of '{key}' was cancelled")]
    Cancelled { key: ObjectKey },

    /// The pass did not finish within its deadline.
    #[error("reconciliation of '{key}' timed out after {after:?}")]
    TimedOut { key: ObjectKey, after: Duration },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The resource itself is malformed.
    #[error(transparent)]
    Resource(#[from] sempex_core::Error),
}

impl Error {
    /// Create a fetch error.
    pub fn fetch(reason: impl Into<String>) -> Self {
        Self::Fetch {
            reason: reason.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(key: &ObjectKey, reason: impl Into<String>) -> Self {
        Self::Conflict {
            key: key.clone(),
            reason: reason.into(),
        }
    }

    /// Create a store error.
    pub fn store(key: &ObjectKey, reason: impl Into<String>) -> Self {
        Self::Store {
            key: key.clone(),
            reason: reason.into(),
        }
    }

    /// Create a cancelled error.
    pub fn cancelled(key: &ObjectKey) -> Self {
        Self::Cancelled { key: key.clone() }
    }

    /// Create a timed out error.
    pub fn timed_out(key: &ObjectKey, after: Duration) -> Self {
        Self::TimedOut {
            key: key.clone(),
            after,
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether a fresh pass could succeed without anything else changing.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. } | Self::Conflict { .. } | Self::Store { .. } | Self::TimedOut { .. }
        )
    }

    /// Whether the pass was abandoned because its invocation was cancelled.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether the failure is an optimistic-concurrency conflict.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::fetch("connection refused");
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_conflict_display() {
        let key = ObjectKey::new("infra", "edge");
        let err = Error::conflict(&key, "resourceVersion 3 is stale");
        assert!(err.to_string().contains("infra/edge"));
        assert!(err.to_string().contains("stale"));
    }

    #[test]
    fn test_retryable_classification() {
        let key = ObjectKey::new("infra", "edge");
        assert!(Error::fetch("x").is_retryable());
        assert!(Error::conflict(&key, "x").is_retryable());
        assert!(Error::store(&key, "x").is_retryable());
        assert!(Error::timed_out(&key, Duration::from_secs(1)).is_retryable());
        assert!(!Error::cancelled(&key).is_retryable());
        assert!(!Error::invalid_config("x").is_retryable());
        assert!(!Error::from(sempex_core::Error::missing_metadata(".metadata.name")).is_retryable());
    }

    #[test]
    fn test_cancelled_is_distinct() {
        let key = ObjectKey::new("infra", "edge");
        assert!(Error::cancelled(&key).is_cancelled());
        assert!(!Error::fetch("x").is_cancelled());
        assert!(Error::conflict(&key, "x").is_conflict());
    }
}
