//! Sequential, rate-limit aware batch fetching.
//!
//! Large ID lists are split into chunks no larger than the upstream's
//! per-request limit and fetched one chunk at a time. Failures are absorbed
//! per chunk so callers always get back an ordered, possibly partial, result:
//!
//! | chunk error | effect |
//! |-------------|--------|
//! | 429, policy says stop | chunk empty, remaining chunks skipped |
//! | other 4xx/5xx, decode | chunk empty, continue |
//! | transport, budget spent | chunk empty, continue |
//! | auth | whole batch fails |

use std::future::Future;
use std::time::Duration;

use crate::error::UpstreamError;
use crate::retry::RetryPolicy;

/// Upstream per-request entity limit for track and artist lookups.
pub const MAX_BATCH_SIZE: usize = 50;

/// Pause between successful chunk fetches.
pub const DEFAULT_INTER_CHUNK_DELAY: Duration = Duration::from_millis(500);

/// What happened to one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkStatus {
    /// Fetched successfully.
    Fetched,
    /// Non rate-limit failure, absorbed.
    Failed(String),
    /// Rate limited and the policy said stop; this aborted the batch.
    RateLimited(String),
    /// Transport retries exhausted.
    Exhausted(String),
    /// Never attempted because an earlier chunk was rate limited.
    Skipped,
}

/// Report for one chunk, in input order.
#[derive(Debug, Clone)]
pub struct ChunkReport<T> {
    /// Position of the chunk in the batch plan.
    pub index: usize,
    /// IDs requested by this chunk.
    pub ids: Vec<String>,
    /// Outcome.
    pub status: ChunkStatus,
    /// Entities returned (empty unless `Fetched`).
    pub items: Vec<T>,
}

/// Aggregated result of [`BatchFetcher::fetch_batched`].
#[derive(Debug, Clone)]
pub struct BatchResult<T> {
    /// Per-chunk reports in original order.
    pub chunks: Vec<ChunkReport<T>>,
}

impl<T> BatchResult<T> {
    /// All fetched entities, concatenated in chunk order.
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.chunks.iter().flat_map(|c| c.items.iter())
    }

    /// Consumes the result, returning all fetched entities in order.
    pub fn into_items(self) -> Vec<T> {
        self.chunks.into_iter().flat_map(|c| c.items).collect()
    }

    /// `true` if any chunk did not fetch.
    pub fn is_partial(&self) -> bool {
        self.chunks
            .iter()
            .any(|c| c.status != ChunkStatus::Fetched)
    }

    /// `true` if the batch was cut short by a rate limit.
    pub fn was_rate_limited(&self) -> bool {
        self.chunks
            .iter()
            .any(|c| matches!(c.status, ChunkStatus::RateLimited(_)))
    }

    /// Number of chunks in the plan.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

/// Splits `ids` into contiguous chunks of at most `batch_size`
/// (clamped to `1..=MAX_BATCH_SIZE`), preserving order.
pub fn partition(ids: &[String], batch_size: usize) -> Vec<Vec<String>> {
    let size = batch_size.clamp(1, MAX_BATCH_SIZE);
    ids.chunks(size).map(<[String]>::to_vec).collect()
}

/// Sequential batch fetcher.
#[derive(Debug, Clone, Copy)]
pub struct BatchFetcher {
    retry: RetryPolicy,
    inter_chunk_delay: Duration,
}

impl Default for BatchFetcher {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl BatchFetcher {
    /// Creates a fetcher with the default inter-chunk delay.
    #[must_use]
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            inter_chunk_delay: DEFAULT_INTER_CHUNK_DELAY,
        }
    }

    /// Sets the pause between successful chunks.
    #[must_use]
    pub fn with_inter_chunk_delay(mut self, delay: Duration) -> Self {
        self.inter_chunk_delay = delay;
        self
    }

    /// The retry policy applied to every chunk.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Fetches `ids` in chunks of `batch_size`, calling `fetch_one` once per
    /// attempt. `max_attempts` bounds attempts per chunk.
    ///
    /// # Errors
    ///
    /// Only fatal errors (credential failures) are returned; every other
    /// failure is recorded in the chunk report.
    pub async fn fetch_batched<T, F, Fut>(
        &self,
        ids: &[String],
        batch_size: usize,
        max_attempts: u32,
        mut fetch_one: F,
    ) -> Result<BatchResult<T>, UpstreamError>
    where
        F: FnMut(Vec<String>) -> Fut,
        Fut: Future<Output = Result<Vec<T>, UpstreamError>>,
    {
        let plan = partition(ids, batch_size);
        let total = plan.len();
        let retry = self.retry.with_max_attempts(max_attempts);
        let mut chunks = Vec::with_capacity(total);
        let mut halted = false;

        for (index, chunk_ids) in plan.into_iter().enumerate() {
            if halted {
                chunks.push(ChunkReport {
                    index,
                    ids: chunk_ids,
                    status: ChunkStatus::Skipped,
                    items: Vec::new(),
                });
                continue;
            }

            tracing::debug!(chunk = index, of = total, size = chunk_ids.len(), "fetching chunk");
            let outcome = retry.run(|| fetch_one(chunk_ids.clone())).await;

            let (status, items) = match outcome {
                Ok(items) => (ChunkStatus::Fetched, items),
                Err(err) if err.is_fatal() => {
                    tracing::error!(chunk = index, error = %err, "batch aborted");
                    return Err(err);
                }
                Err(err @ UpstreamError::RateLimited { .. }) => {
                    tracing::warn!(
                        chunk = index,
                        remaining = total - index - 1,
                        error = %err,
                        "rate limited, skipping remaining chunks"
                    );
                    halted = true;
                    (ChunkStatus::RateLimited(err.to_string()), Vec::new())
                }
                Err(err) if err.is_transport() => {
                    tracing::warn!(chunk = index, error = %err, "transport retries exhausted");
                    (ChunkStatus::Exhausted(err.to_string()), Vec::new())
                }
                Err(err) => {
                    tracing::warn!(chunk = index, error = %err, "chunk failed");
                    (ChunkStatus::Failed(err.to_string()), Vec::new())
                }
            };

            let fetched = status == ChunkStatus::Fetched;
            chunks.push(ChunkReport {
                index,
                ids: chunk_ids,
                status,
                items,
            });

            if fetched && index + 1 < total && !self.inter_chunk_delay.is_zero() {
                tokio::time::sleep(self.inter_chunk_delay).await;
            }
        }

        Ok(BatchResult { chunks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("id{i}")).collect()
    }

    fn fetcher() -> BatchFetcher {
        BatchFetcher::default()
    }

    #[test]
    fn test_partition_sizes() {
        let plan = partition(&ids(120), 50);
        let sizes: Vec<_> = plan.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![50, 50, 20]);
        assert_eq!(plan[0][0], "id0");
        assert_eq!(plan[2][19], "id119");
    }

    #[test]
    fn test_partition_clamps_batch_size() {
        assert_eq!(partition(&ids(120), 500).len(), 3);
        assert_eq!(partition(&ids(3), 0).len(), 3);
        assert!(partition(&[], 50).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_fetched_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let result = fetcher()
            .fetch_batched(&ids(120), 50, 3, move |chunk| {
                let s = Arc::clone(&s);
                async move {
                    s.lock().unwrap().push(chunk.len());
                    Ok::<_, UpstreamError>(chunk)
                }
            })
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![50, 50, 20]);
        assert_eq!(result.chunk_count(), 3);
        assert!(!result.is_partial());
        let all = result.into_items();
        assert_eq!(all.len(), 120);
        assert_eq!(all[0], "id0");
        assert_eq!(all[119], "id119");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_stop_skips_remaining_chunks() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let c = Arc::clone(&calls);
        let result = fetcher()
            .fetch_batched(&ids(120), 50, 3, move |chunk| {
                let c = Arc::clone(&c);
                async move {
                    let first = chunk[0].clone();
                    c.lock().unwrap().push(first.clone());
                    if first == "id50" {
                        Err(UpstreamError::RateLimited { retry_after_secs: 120 })
                    } else {
                        Ok(chunk)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["id0", "id50"]);
        assert!(result.was_rate_limited());
        assert_eq!(result.chunks[0].status, ChunkStatus::Fetched);
        assert!(matches!(result.chunks[1].status, ChunkStatus::RateLimited(_)));
        assert_eq!(result.chunks[2].status, ChunkStatus::Skipped);
        assert!(result.chunks[1].items.is_empty());
        assert!(result.chunks[2].items.is_empty());
        assert_eq!(result.items().count(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retry_same_chunk() {
        let calls = Arc::new(Mutex::new(0u32));
        let c = Arc::clone(&calls);
        let started = tokio::time::Instant::now();
        let result = fetcher()
            .fetch_batched(&ids(10), 50, 3, move |chunk| {
                let c = Arc::clone(&c);
                async move {
                    let mut n = c.lock().unwrap();
                    *n += 1;
                    if *n == 1 {
                        Err(UpstreamError::RateLimited { retry_after_secs: 30 })
                    } else {
                        Ok(chunk)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(*calls.lock().unwrap(), 2);
        assert!(!result.is_partial());
        // 30s advisory wait capped at 10s.
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_rate_limit_failure_is_chunk_local() {
        let result = fetcher()
            .fetch_batched(&ids(120), 50, 3, |chunk| async move {
                if chunk[0] == "id0" {
                    Err(UpstreamError::unavailable(503, "maintenance"))
                } else {
                    Ok(chunk)
                }
            })
            .await
            .unwrap();

        assert!(matches!(result.chunks[0].status, ChunkStatus::Failed(_)));
        assert_eq!(result.chunks[1].status, ChunkStatus::Fetched);
        assert_eq!(result.chunks[2].status, ChunkStatus::Fetched);
        assert_eq!(result.items().count(), 70);
        assert!(result.is_partial());
        assert!(!result.was_rate_limited());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_exhaustion_continues() {
        let calls = Arc::new(Mutex::new(0u32));
        let c = Arc::clone(&calls);
        let result = fetcher()
            .fetch_batched(&ids(60), 50, 3, move |chunk| {
                let c = Arc::clone(&c);
                async move {
                    *c.lock().unwrap() += 1;
                    if chunk.len() == 50 {
                        Err(UpstreamError::Transport("timed out".into()))
                    } else {
                        Ok(chunk)
                    }
                }
            })
            .await
            .unwrap();

        // 3 attempts on the first chunk, 1 on the second.
        assert_eq!(*calls.lock().unwrap(), 4);
        assert!(matches!(result.chunks[0].status, ChunkStatus::Exhausted(_)));
        assert_eq!(result.chunks[1].items.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_aborts_batch() {
        let result: Result<BatchResult<String>, _> = fetcher()
            .fetch_batched(&ids(120), 50, 3, |_chunk| async {
                Err(UpstreamError::auth("refresh token revoked"))
            })
            .await;
        assert!(matches!(result, Err(UpstreamError::Auth { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inter_chunk_delay() {
        let started = tokio::time::Instant::now();
        fetcher()
            .fetch_batched(&ids(120), 50, 3, |chunk| async move { Ok::<_, UpstreamError>(chunk) })
            .await
            .unwrap();
        // Two gaps between three chunks.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1500), "{elapsed:?}");
    }
}
