//! Tag invalidation with audit.
//!
//! Every call drops the affected cache entries, drops the upstream access
//! credential when `spotify-token` is in scope, and appends exactly one
//! event to the history log.

use std::sync::Arc;

use serde::Serialize;
use spinshelf_spotify::TokenCache;
use time::OffsetDateTime;

use crate::cache::{CacheTag, TaggedCache};
use crate::history::{HistoryAction, HistoryEvent, PURGE_ALL_TAG, RevalidationHistoryLog};

/// Acknowledgement returned by an invalidation.
#[derive(Debug, Clone, Serialize)]
pub struct Ack {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Cache entries dropped.
    pub removed: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Performs invalidations and records them.
pub struct Revalidator {
    cache: Arc<TaggedCache>,
    history: Arc<RevalidationHistoryLog>,
    tokens: Arc<TokenCache>,
}

impl Revalidator {
    pub fn new(
        cache: Arc<TaggedCache>,
        history: Arc<RevalidationHistoryLog>,
        tokens: Arc<TokenCache>,
    ) -> Self {
        Self {
            cache,
            history,
            tokens,
        }
    }

    /// Invalidates one tag.
    pub fn refresh_tag(&self, tag: &CacheTag) -> Ack {
        let removed = self.invalidate(tag);
        let event = self.history.append(tag.to_string(), HistoryAction::Refresh);
        tracing::info!(tag = %tag, removed, "cache tag revalidated");

        Ack {
            success: true,
            tag: Some(tag.to_string()),
            tags: None,
            removed,
            timestamp: event.timestamp,
        }
    }

    /// Invalidates every coarse tag and records a single `all` event.
    pub fn purge_all(&self) -> Ack {
        let tags = CacheTag::purge_all_set();
        let removed: usize = tags.iter().map(|tag| self.invalidate(tag)).sum();
        let event = self.history.append(PURGE_ALL_TAG, HistoryAction::PurgeAll);
        tracing::info!(removed, "all cache tags revalidated");

        Ack {
            success: true,
            tag: None,
            tags: Some(tags.iter().map(ToString::to_string).collect()),
            removed,
            timestamp: event.timestamp,
        }
    }

    /// Records an event without invalidating anything, for collaborators
    /// that revalidated through another channel.
    pub fn record(&self, tag: &str, action: HistoryAction) -> HistoryEvent {
        self.history.append(tag, action)
    }

    pub fn history(&self) -> &RevalidationHistoryLog {
        &self.history
    }

    pub fn cache(&self) -> &TaggedCache {
        &self.cache
    }

    fn invalidate(&self, tag: &CacheTag) -> usize {
        if *tag == CacheTag::SpotifyToken {
            self.tokens.invalidate();
        }
        self.cache.invalidate_tag(tag)
    }
}
