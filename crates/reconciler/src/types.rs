//! Summaries of reconciliation passes.

use serde::Serialize;

/// Outcome of one incremental round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoundResult {
    /// Objects handed to the operations.
    pub attempted: usize,
    /// Objects whose operation succeeded.
    pub succeeded: usize,
    /// Objects whose operation failed and were scheduled for retry.
    pub failed: usize,
    /// Status writes skipped because the row changed meanwhile.
    pub skipped: usize,
}

impl RoundResult {
    /// Check if all operations succeeded.
    pub const fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Whether the round had nothing to do.
    pub const fn is_idle(&self) -> bool {
        self.attempted == 0
    }
}

/// Outcome of a full reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FullResult {
    /// `Done` objects re-applied to the resource.
    pub updated: usize,
    /// Re-applied objects for which the resource had drifted.
    pub repaired: usize,
    /// Objects whose re-apply failed.
    pub failed: usize,
    /// Objects handed to prune.
    pub pruned_against: usize,
    /// Prune failure, if any.
    pub prune_error: Option<String>,
}

impl FullResult {
    /// Check if every update and the prune succeeded.
    pub const fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.prune_error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_result() {
        let idle = RoundResult::default();
        assert!(idle.is_idle());
        assert!(idle.all_succeeded());

        let partial = RoundResult {
            attempted: 3,
            succeeded: 2,
            failed: 1,
            skipped: 0,
        };
        assert!(!partial.is_idle());
        assert!(!partial.all_succeeded());
    }

    #[test]
    fn test_full_result_prune_failure() {
        let result = FullResult {
            prune_error: Some("map closed".to_string()),
            ..FullResult::default()
        };
        assert!(!result.all_succeeded());
    }
}
