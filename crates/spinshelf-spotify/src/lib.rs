//! Spotify Web API access for Spinshelf.
//!
//! This crate owns everything that talks to the upstream music API:
//!
//! - [`TokenCache`] - shared, single-flight access credential cache
//! - [`RateLimitPolicy`] - pure 429 retry decision
//! - [`RetryPolicy`] / [`RetryMachine`] - explicit retry state machine
//! - [`BatchFetcher`] - sequential chunked lookups with partial results
//! - [`SpotifyClient`] - typed endpoints built on the above
//!
//! Caching of fetched entities is the caller's concern; this crate never
//! stores anything but the access credential.

pub mod batch;
pub mod client;
pub mod error;
pub mod models;
pub mod rate_limit;
pub mod retry;
pub mod token;

pub use batch::{BatchFetcher, BatchResult, ChunkReport, ChunkStatus, MAX_BATCH_SIZE, partition};
pub use client::{SpotifyClient, build_http_client, is_valid_id};
pub use error::UpstreamError;
pub use rate_limit::{RateLimitPolicy, RetryDecision};
pub use retry::{RetryMachine, RetryPolicy, RetryState, Transition};
pub use token::{AccessCredential, TokenCache, TokenCacheConfig};
