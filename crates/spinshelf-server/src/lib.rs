pub mod admin;
pub mod api;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod handlers;
pub mod history;
pub mod middleware;
pub mod observability;
pub mod server;

pub use admin::{AdminAuth, AdminIdentity, Revalidator, admin_routes};
pub use cache::{CacheStats, CacheTag, CacheTags, TaggedCache};
pub use catalog::{CatalogSettings, MusicCatalog};
pub use config::{AppConfig, CacheConfig, FetchConfig, ServerConfig, SpotifyConfig};
pub use error::ApiError;
pub use history::{HistoryAction, HistoryEvent, RevalidationHistoryLog};
pub use observability::init_tracing;
pub use server::{AppState, ServerBuilder, SpinshelfServer, build_app};
