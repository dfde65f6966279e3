//! Explicit retry state machine.
//!
//! ```text
//! Pending ──attempt──▶ Succeeded
//!    │
//!    └─error─▶ Retrying(n) ──attempt──▶ Succeeded
//!                  │
//!                  └─error (policy says stop)─▶ Exhausted
//! ```
//!
//! [`RetryMachine`] only computes transitions. Sleeping happens in
//! [`RetryPolicy::run`], which is the single place that touches the clock.

use std::future::Future;
use std::time::Duration;

use crate::error::UpstreamError;
use crate::rate_limit::{RateLimitPolicy, RetryDecision};

/// Default number of attempts per request (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base of the linear transport backoff (`base * attempt`).
pub const DEFAULT_TRANSPORT_BACKOFF: Duration = Duration::from_secs(2);

/// Current state of a retried request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// No attempt made yet.
    Pending,
    /// `n` retries have been scheduled so far.
    Retrying(u32),
    /// The request gave up.
    Exhausted,
    /// The last attempt succeeded.
    Succeeded,
}

/// Outcome of feeding an error into the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Wait for the given duration, then attempt again.
    Retry(Duration),
    /// Stop retrying and surface the error.
    Stop,
}

/// Retry limits shared by every request the client makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Linear backoff base for transport failures.
    pub transport_backoff: Duration,
    /// 429 handling.
    pub rate_limit: RateLimitPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            transport_backoff: DEFAULT_TRANSPORT_BACKOFF,
            rate_limit: RateLimitPolicy::default(),
        }
    }
}

impl RetryPolicy {
    /// Sets the maximum number of attempts (at least one).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the transport backoff base.
    #[must_use]
    pub fn with_transport_backoff(mut self, backoff: Duration) -> Self {
        self.transport_backoff = backoff;
        self
    }

    /// Runs `op` until it succeeds or the machine gives up.
    ///
    /// The returned error is the one from the final attempt. A
    /// `RateLimited` error therefore means the rate-limit policy decided to
    /// stop, and a `Transport` error means the transport budget is spent.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut machine = RetryMachine::new(*self);
        loop {
            machine.begin_attempt();
            match op().await {
                Ok(value) => {
                    machine.succeed();
                    return Ok(value);
                }
                Err(err) => match machine.fail(&err) {
                    Transition::Retry(wait) => {
                        if !wait.is_zero() {
                            tokio::time::sleep(wait).await;
                        }
                    }
                    Transition::Stop => return Err(err),
                },
            }
        }
    }
}

/// Pure transition logic for one request.
#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
    attempt: u32,
    last_decision: Option<RetryDecision>,
}

impl RetryMachine {
    /// Creates a machine in the `Pending` state.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Pending,
            attempt: 0,
            last_decision: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RetryState {
        self.state
    }

    /// 1-based number of the attempt in flight (0 before the first).
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The last rate-limit decision taken, if any.
    #[must_use]
    pub fn last_decision(&self) -> Option<&RetryDecision> {
        self.last_decision.as_ref()
    }

    /// Marks the start of a new attempt.
    pub fn begin_attempt(&mut self) {
        self.attempt += 1;
    }

    /// Marks the in-flight attempt as successful.
    pub fn succeed(&mut self) {
        self.state = RetryState::Succeeded;
    }

    /// Feeds a failed attempt into the machine.
    pub fn fail(&mut self, err: &UpstreamError) -> Transition {
        let transition = match err {
            UpstreamError::RateLimited { retry_after_secs } => {
                let decision = self.policy.rate_limit.decide(
                    *retry_after_secs,
                    self.attempt,
                    self.policy.max_attempts,
                );
                tracing::debug!(
                    attempt = self.attempt,
                    should_retry = decision.should_retry,
                    reason = %decision.reason,
                    "rate limit decision"
                );
                let transition = if decision.should_retry {
                    Transition::Retry(Duration::from_secs(decision.retry_after_seconds))
                } else {
                    Transition::Stop
                };
                self.last_decision = Some(decision);
                transition
            }
            UpstreamError::Transport(_) if self.attempt < self.policy.max_attempts => {
                Transition::Retry(self.policy.transport_backoff.saturating_mul(self.attempt))
            }
            _ => Transition::Stop,
        };

        self.state = match transition {
            Transition::Retry(_) => match self.state {
                RetryState::Retrying(n) => RetryState::Retrying(n + 1),
                _ => RetryState::Retrying(1),
            },
            Transition::Stop => RetryState::Exhausted,
        };
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transport() -> UpstreamError {
        UpstreamError::Transport("connection reset".into())
    }

    #[test]
    fn test_transport_backoff_is_linear() {
        let mut m = RetryMachine::new(RetryPolicy::default());
        assert_eq!(m.state(), RetryState::Pending);

        m.begin_attempt();
        assert_eq!(m.fail(&transport()), Transition::Retry(Duration::from_secs(2)));
        assert_eq!(m.state(), RetryState::Retrying(1));

        m.begin_attempt();
        assert_eq!(m.fail(&transport()), Transition::Retry(Duration::from_secs(4)));
        assert_eq!(m.state(), RetryState::Retrying(2));

        m.begin_attempt();
        assert_eq!(m.fail(&transport()), Transition::Stop);
        assert_eq!(m.state(), RetryState::Exhausted);
    }

    #[test]
    fn test_huge_transport_backoff_saturates() {
        let policy = RetryPolicy::default().with_transport_backoff(Duration::MAX);
        let mut m = RetryMachine::new(policy);
        m.begin_attempt();
        m.fail(&transport());
        m.begin_attempt();
        assert_eq!(m.fail(&transport()), Transition::Retry(Duration::MAX));
    }

    #[test]
    fn test_rate_limit_uses_policy() {
        let mut m = RetryMachine::new(RetryPolicy::default());
        m.begin_attempt();
        let t = m.fail(&UpstreamError::RateLimited { retry_after_secs: 30 });
        assert_eq!(t, Transition::Retry(Duration::from_secs(10)));
        assert!(m.last_decision().is_some_and(|d| d.should_retry));

        m.begin_attempt();
        let t = m.fail(&UpstreamError::RateLimited { retry_after_secs: 120 });
        assert_eq!(t, Transition::Stop);
        assert_eq!(m.state(), RetryState::Exhausted);
    }

    #[test]
    fn test_non_retryable_errors_stop_immediately() {
        for err in [
            UpstreamError::unavailable(500, "boom"),
            UpstreamError::NotFound("x".into()),
            UpstreamError::auth("nope"),
        ] {
            let mut m = RetryMachine::new(RetryPolicy::default());
            m.begin_attempt();
            assert_eq!(m.fail(&err), Transition::Stop);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let started = tokio::time::Instant::now();

        let c = Arc::clone(&calls);
        let result = policy
            .run(|| {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transport())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 2s after the first failure, 4s after the second.
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_surfaces_rate_limit_stop() {
        let policy = RetryPolicy::default();
        let result: Result<(), _> = policy
            .run(|| async { Err(UpstreamError::RateLimited { retry_after_secs: 300 }) })
            .await;
        assert!(matches!(
            result,
            Err(UpstreamError::RateLimited { retry_after_secs: 300 })
        ));
    }
}
