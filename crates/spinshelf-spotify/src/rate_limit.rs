//! Rate-limit retry policy.
//!
//! Converts an upstream 429 signal into a retry/no-retry verdict. The
//! decision is a pure function of its inputs; the only clock it reads is the
//! one passed to [`RateLimitPolicy::decide_at`], and it is used solely to
//! render the "available at" time in the reason text.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Upstream waits longer than this are not worth honouring in-request.
pub const DEFAULT_FAST_FAIL_AFTER_SECS: u64 = 60;

/// Cap applied to honoured waits.
pub const DEFAULT_MAX_WAIT_SECS: u64 = 10;

/// Verdict returned by [`RateLimitPolicy::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether the caller should re-attempt the same request.
    pub should_retry: bool,
    /// Seconds to wait before re-attempting. For a "deep" rate limit this is
    /// the uncapped upstream wait, reported for information only.
    pub retry_after_seconds: u64,
    /// Human readable reason, suitable for logs.
    pub reason: String,
}

/// Thresholds for the 429 decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Upstream waits strictly greater than this fail fast.
    pub fast_fail_after_secs: u64,
    /// Maximum wait honoured before retrying.
    pub max_wait_secs: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            fast_fail_after_secs: DEFAULT_FAST_FAIL_AFTER_SECS,
            max_wait_secs: DEFAULT_MAX_WAIT_SECS,
        }
    }
}

impl RateLimitPolicy {
    /// Decides whether to retry after a 429, using the current wall clock
    /// for the reason text.
    ///
    /// `attempt` is the 1-based number of the attempt that was just rejected.
    #[must_use]
    pub fn decide(&self, retry_after_seconds: u64, attempt: u32, max_attempts: u32) -> RetryDecision {
        self.decide_at(
            retry_after_seconds,
            attempt,
            max_attempts,
            OffsetDateTime::now_utc(),
        )
    }

    /// Same as [`decide`](Self::decide) with an explicit clock.
    #[must_use]
    pub fn decide_at(
        &self,
        retry_after_seconds: u64,
        attempt: u32,
        max_attempts: u32,
        now: OffsetDateTime,
    ) -> RetryDecision {
        // Must run before the cap is applied.
        if retry_after_seconds > self.fast_fail_after_secs {
            return RetryDecision {
                should_retry: false,
                retry_after_seconds,
                reason: format!(
                    "rate limited for {retry_after_seconds}s (limit {}s); retry available at {}",
                    self.fast_fail_after_secs,
                    available_at(now, retry_after_seconds)
                ),
            };
        }

        if attempt >= max_attempts {
            return RetryDecision {
                should_retry: false,
                retry_after_seconds,
                reason: format!("retry budget exhausted after {attempt}/{max_attempts} attempts"),
            };
        }

        let wait = retry_after_seconds.min(self.max_wait_secs);
        RetryDecision {
            should_retry: true,
            retry_after_seconds: wait,
            reason: format!(
                "retrying in {wait}s (upstream asked for {retry_after_seconds}s), attempt {attempt}/{max_attempts}"
            ),
        }
    }
}

fn available_at(now: OffsetDateTime, secs: u64) -> String {
    let offset = time::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX));
    now.checked_add(offset)
        .and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_else(|| "an unknown time".to_string())
}
