//! Tagged response cache.
//!
//! ```text
//! read API → MusicCatalog → TaggedCache (hit) ──────────────▶ response
//!                               │ miss
//!                               └─▶ SpotifyClient → set(key, tags, ttl)
//! admin → Revalidator → invalidate_tag(tag) → entries declaring tag dropped
//! ```
//!
//! State is per process. Horizontally scaled deployments keep independent
//! caches and must be revalidated instance by instance.

pub mod store;
pub mod tags;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

pub use store::{CacheEncodeError, CacheEntry, CacheStats, TaggedCache};
pub use tags::{CacheTag, CacheTags, UnknownTag};

/// Spawns the periodic expired-entry sweep.
pub fn spawn_cleanup_task(cache: Arc<TaggedCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = cache.cleanup_expired();
            if removed > 0 {
                tracing::debug!(removed, "expired cache entries purged");
            }
        }
    })
}
