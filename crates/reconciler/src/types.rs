//! Core types for the reconciler.

use std::time::Duration;

use sempex_core::ObjectKey;
use serde::{Deserialize, Serialize};

/// Scheduling instruction returned by a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequeueDirective {
    /// Wait for the next external trigger.
    NoRequeue,
    /// Invoke the pass again for the same key after the delay.
    RequeueAfter(Duration),
}

impl RequeueDirective {
    /// Delay before the next pass, if one was requested.
    #[inline]
    pub const fn delay(&self) -> Option<Duration> {
        match self {
            Self::NoRequeue => None,
            Self::RequeueAfter(delay) => Some(*delay),
        }
    }
}

/// What a pass did to the stored resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PassAction {
    /// The resource no longer exists; nothing was fetched or written.
    Deleted,
    /// The stored certificate already matched the candidate.
    Unchanged { certificate: i64 },
    /// The stored certificate was replaced.
    Updated { from: i64, to: i64 },
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// Resource the pass ran for.
    pub key: ObjectKey,
    /// Effect on the stored resource.
    pub action: PassAction,
    /// When to run again.
    pub directive: RequeueDirective,
}

impl ReconcileOutcome {
    /// Outcome for a resource that disappeared before it could be loaded.
    pub const fn deleted(key: ObjectKey) -> Self {
        Self {
            key,
            action: PassAction::Deleted,
            directive: RequeueDirective::NoRequeue,
        }
    }

    /// Whether the pass wrote to the store.
    #[inline]
    pub const fn wrote(&self) -> bool {
        matches!(self.action, PassAction::Updated { .. })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use super::*;

    #[test]
    fn test_deleted_outcome_does_not_requeue() {
        let outcome = ReconcileOutcome::deleted(ObjectKey::new("infra", "edge"));
        assert_eq!(outcome.directive, RequeueDirective::NoRequeue);
        assert_eq!(outcome.directive.delay(), None);
        assert!(!outcome.wrote());
    }

    #[test]
    fn test_wrote_only_for_updates() {
        let key = ObjectKey::new("infra", "edge");
        let directive = RequeueDirective::RequeueAfter(Duration::from_secs(60));
        let updated = ReconcileOutcome {
            key: key.clone(),
            action: PassAction::Updated { from: 5, to: 7 },
            directive,
        };
        let unchanged = ReconcileOutcome {
            key,
            action: PassAction::Unchanged { certificate: 7 },
            directive,
        };

        assert!(updated.wrote());
        assert!(!unchanged.wrote());
        assert_eq!(updated.directive.delay(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_outcome_serializes_action_kind() {
        let outcome = ReconcileOutcome {
            key: ObjectKey::new("infra", "edge"),
            action: PassAction::Updated { from: 5, to: 7 },
            directive: RequeueDirective::NoRequeue,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["action"]["kind"], "updated");
        assert_eq!(json["action"]["to"], 7);
        assert_eq!(json["directive"], "no_requeue");
    }
}
