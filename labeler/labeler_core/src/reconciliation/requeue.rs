//! Requeue decisions returned to the host that triggers reconciliation.

use std::time::Duration;

use labeler_shared_types::LabelerError;
use serde::{Deserialize, Serialize};

/// What the trigger host should do after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// The cycle succeeded; wait for the next event.
    Done,
    /// Retry the whole cycle after the given delay.
    RequeueAfter(Duration),
    /// Retry the whole cycle as soon as possible.
    RequeueNow,
}

/// Backoff strategy for retry attempts.
///
/// Determines how the delay between retry attempts increases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Fixed delay between all retry attempts.
    Fixed,

    /// Exponentially increasing delay (e.g., 1s, 2s, 4s, 8s).
    Exponential,

    /// Linearly increasing delay (e.g., 1s, 2s, 3s, 4s).
    Linear,
}

/// Policy for spacing out retries of a failing declaration.
///
/// Retries never stop: a declaration that cannot converge keeps being
/// retried at the capped delay and shows up as a non-converged status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Strategy for calculating delay between retries.
    pub backoff_strategy: BackoffStrategy,

    /// Delay before the first retry attempt, in milliseconds.
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(5), Duration::from_secs(300))
    }
}

impl RetryPolicy {
    /// Creates a retry policy with fixed backoff.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            backoff_strategy: BackoffStrategy::Fixed,
            initial_delay_ms: delay.as_millis() as u64,
            max_delay_ms: delay.as_millis() as u64,
        }
    }

    /// Creates a retry policy with exponential backoff.
    pub fn exponential(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            backoff_strategy: BackoffStrategy::Exponential,
            initial_delay_ms: initial_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
        }
    }

    /// Creates a retry policy with linear backoff.
    pub fn linear(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            backoff_strategy: BackoffStrategy::Linear,
            initial_delay_ms: initial_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
        }
    }

    /// Calculates the delay for a specific retry attempt number.
    ///
    /// # Arguments
    ///
    /// * `attempt` - The retry attempt number (0-indexed)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay_ms;
        let millis = match self.backoff_strategy {
            BackoffStrategy::Fixed => initial,
            BackoffStrategy::Exponential => {
                let multiplier = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                initial.saturating_mul(multiplier)
            }
            BackoffStrategy::Linear => initial.saturating_mul(u64::from(attempt) + 1),
        };
        Duration::from_millis(millis.min(self.max_delay_ms.max(initial)))
    }

    /// Requeue decision for a failed cycle on its `attempt`-th consecutive failure.
    pub fn action_for_error(&self, error: &LabelerError, attempt: u32) -> ReconcileAction {
        match error {
            e if e.is_benign() => ReconcileAction::Done,
            // Fresh state on the next read resolves the conflict.
            LabelerError::ConflictingMutation { .. } => ReconcileAction::RequeueNow,
            _ => ReconcileAction::RequeueAfter(self.calculate_delay(attempt)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::fixed(Duration::from_secs(2));
        assert_eq!(policy.calculate_delay(0), Duration::from_secs(2));
        assert_eq!(policy.calculate_delay(7), Duration::from_secs(2));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy::exponential(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(policy.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(policy.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(policy.calculate_delay(3), Duration::from_secs(8));
        assert_eq!(policy.calculate_delay(4), Duration::from_secs(10));
        assert_eq!(policy.calculate_delay(200), Duration::from_secs(10));
    }

    #[test]
    fn test_linear_delay() {
        let policy = RetryPolicy::linear(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(policy.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(policy.calculate_delay(2), Duration::from_secs(3));
    }

    #[test]
    fn test_action_for_error() {
        let policy = RetryPolicy::fixed(Duration::from_secs(5));
        assert_eq!(
            policy.action_for_error(&LabelerError::NotFound("gpu".into()), 0),
            ReconcileAction::Done
        );
        assert_eq!(
            policy.action_for_error(
                &LabelerError::ConflictingMutation {
                    node: "n1".into(),
                    reason: "stale".into()
                },
                0
            ),
            ReconcileAction::RequeueNow
        );
        assert_eq!(
            policy.action_for_error(&LabelerError::InventoryUnavailable("down".into()), 3),
            ReconcileAction::RequeueAfter(Duration::from_secs(5))
        );
        assert_eq!(
            policy.action_for_error(&LabelerError::NodeNotFound("ghost".into()), 0),
            ReconcileAction::RequeueAfter(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: RetryPolicy = toml::from_str(r#"backoff_strategy = "linear""#).unwrap();
        assert_eq!(policy.backoff_strategy, BackoffStrategy::Linear);
        assert_eq!(policy.initial_delay_ms, RetryPolicy::default().initial_delay_ms);
    }
}
