//! Retry policy and backoff.
//!
//! Stateless helpers: callers track the attempt number. Attempts are 1-based;
//! the wait before attempt `n >= 2` is `min(30s, 2^(n-2) * (n-1) s)` plus up
//! to one second of jitter.

use std::time::Duration;

use rand::Rng;
use stepflow_types::workflow::{Step, WorkflowSettings};
use tokio_util::sync::CancellationToken;

use super::step_runner::StepError;

/// Upper bound of the deterministic part of the backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Upper bound (exclusive) of the random jitter added to each backoff.
pub const MAX_JITTER: Duration = Duration::from_secs(1);

/// Attempt budget and per-attempt timeout for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Option<Duration>,
}

impl StepPolicy {
    /// Resolve the policy for `step`: its own retry block, else the workflow
    /// setting. Always at least one attempt.
    pub fn for_step(step: &Step, settings: &WorkflowSettings) -> Self {
        let max_attempts = step
            .retry
            .as_ref()
            .map(|r| r.max_attempts)
            .unwrap_or(settings.max_retries)
            .max(1);
        Self {
            max_attempts,
            attempt_timeout: settings.step_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Stateless retry decisions.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether attempt `attempt` (1-based) failing with `error` earns another.
    pub fn should_retry(policy: &StepPolicy, attempt: u32, error: &StepError) -> bool {
        attempt < policy.max_attempts && error.is_retryable()
    }

    /// Deterministic part of the wait before `attempt`.
    pub fn base_delay(attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exp = attempt - 2;
        let factor = 2u64
            .checked_pow(exp)
            .and_then(|p| p.checked_mul(u64::from(attempt - 1)))
            .unwrap_or(u64::MAX);
        Duration::from_secs(factor).min(MAX_BACKOFF)
    }

    /// Full wait before `attempt`, jitter included. Zero for the first attempt.
    pub fn backoff_delay(attempt: u32) -> Duration {
        let base = Self::base_delay(attempt);
        if attempt < 2 {
            return base;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..MAX_JITTER.as_millis() as u64);
        base + Duration::from_millis(jitter_ms)
    }
}

/// Sleep for `delay` unless cancelled first. Returns `false` on cancellation.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow_types::workflow::{ConditionStepConfig, RetryConfig, StepConfig};

    fn step() -> Step {
        Step::new(
            "s",
            StepConfig::Condition(ConditionStepConfig {
                condition: "true".into(),
            }),
        )
    }

    #[test]
    fn backoff_curve() {
        assert_eq!(RetryHandler::base_delay(1), Duration::ZERO);
        assert_eq!(RetryHandler::base_delay(2), Duration::from_secs(1));
        assert_eq!(RetryHandler::base_delay(3), Duration::from_secs(4));
        assert_eq!(RetryHandler::base_delay(4), Duration::from_secs(12));
        assert_eq!(RetryHandler::base_delay(5), Duration::from_secs(30));
        assert_eq!(RetryHandler::base_delay(80), MAX_BACKOFF);
    }

    #[test]
    fn jitter_stays_below_one_second() {
        for attempt in 2..6 {
            let base = RetryHandler::base_delay(attempt);
            let delay = RetryHandler::backoff_delay(attempt);
            assert!(delay >= base);
            assert!(delay < base + MAX_JITTER);
        }
        assert_eq!(RetryHandler::backoff_delay(1), Duration::ZERO);
    }

    #[test]
    fn policy_prefers_step_retry_block() {
        let settings = WorkflowSettings {
            max_retries: 4,
            step_timeout_secs: Some(7),
            ..WorkflowSettings::default()
        };
        let plain = StepPolicy::for_step(&step(), &settings);
        assert_eq!(plain.max_attempts, 4);
        assert_eq!(plain.attempt_timeout, Some(Duration::from_secs(7)));

        let mut custom = step();
        custom.retry = Some(RetryConfig { max_attempts: 0 });
        assert_eq!(StepPolicy::for_step(&custom, &settings).max_attempts, 1);
    }

    #[test]
    fn non_retryable_errors_stop_early() {
        let policy = StepPolicy {
            max_attempts: 3,
            attempt_timeout: None,
        };
        let transient = StepError::Script("exit 1".into());
        assert!(RetryHandler::should_retry(&policy, 1, &transient));
        assert!(!RetryHandler::should_retry(&policy, 3, &transient));
        assert!(!RetryHandler::should_retry(
            &policy,
            1,
            &StepError::Configuration("no tool".into())
        ));
        assert!(!RetryHandler::should_retry(&policy, 1, &StepError::Cancelled));
    }

    #[tokio::test]
    async fn sleep_is_cancellable() {
        let token = CancellationToken::new();
        token.cancel();
        let started = std::time::Instant::now();
        assert!(!sleep_or_cancel(Duration::from_secs(30), &token).await);
        assert!(started.elapsed() < Duration::from_secs(5));

        let live = CancellationToken::new();
        assert!(sleep_or_cancel(Duration::from_millis(5), &live).await);
    }
}
