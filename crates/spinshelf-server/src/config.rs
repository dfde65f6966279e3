use serde::{Deserialize, Serialize};
use spinshelf_spotify::{MAX_BATCH_SIZE, is_valid_id};
use std::{fmt, net::SocketAddr, time::Duration};
use url::Url;

/// Upstream credentials live for an hour.
pub const MAX_TOKEN_TTL_SECS: u64 = 3600;
pub const MAX_TRANSPORT_BACKOFF_MS: u64 = 60_000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Upstream credentials and endpoints
    #[serde(default)]
    pub spotify: SpotifyConfig,
    /// Batching and retry limits
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Cache lifetimes and history size
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    /// Hand-picked track list served by `/api/curated`
    #[serde(default)]
    pub curated: CuratedConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Upstream validation
        for (name, value) in [
            ("spotify.api_base_url", &self.spotify.api_base_url),
            ("spotify.token_url", &self.spotify.token_url),
        ] {
            let url = Url::parse(value).map_err(|e| format!("{name} is not a valid URL: {e}"))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(format!("{name} must use http or https"));
            }
        }
        if self.spotify.request_timeout_ms == 0 {
            return Err("spotify.request_timeout_ms must be > 0".into());
        }
        if self.spotify.token_ttl_secs == 0 || self.spotify.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(format!(
                "spotify.token_ttl_secs must be between 1 and {MAX_TOKEN_TTL_SECS}"
            ));
        }
        // Fetch validation
        if self.fetch.batch_size == 0 || self.fetch.batch_size > MAX_BATCH_SIZE {
            return Err(format!("fetch.batch_size must be between 1 and {MAX_BATCH_SIZE}"));
        }
        if self.fetch.max_retries == 0 {
            return Err("fetch.max_retries must be >= 1".into());
        }
        if self.fetch.transport_backoff_ms > MAX_TRANSPORT_BACKOFF_MS {
            return Err(format!(
                "fetch.transport_backoff_ms must be <= {MAX_TRANSPORT_BACKOFF_MS}"
            ));
        }
        if let Some(bad) = self.curated.track_ids.iter().find(|id| !is_valid_id(id)) {
            return Err(format!("curated.track_ids contains malformed id '{bad}'"));
        }
        // Cache validation
        if self.cache.history_capacity == 0 {
            return Err("cache.history_capacity must be >= 1".into());
        }
        if self.cache.cleanup_interval_secs == 0 {
            return Err("cache.cleanup_interval_secs must be > 0".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Upstream API settings.
///
/// Secrets are best supplied through the environment, e.g.
/// `SPINSHELF__SPOTIFY__CLIENT_SECRET`.
#[derive(Clone, Serialize, Deserialize)]
pub struct SpotifyConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Account whose playlists are listed
    #[serde(default)]
    pub user_id: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Kept below the real 60 minute token lifetime
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_api_base_url() -> String {
    "https://api.spotify.com/v1".into()
}
fn default_token_url() -> String {
    "https://accounts.spotify.com/api/token".into()
}
fn default_token_ttl_secs() -> u64 {
    50 * 60
}
fn default_request_timeout_ms() -> u64 {
    10_000
}

impl SpotifyConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            user_id: String::new(),
            api_base_url: default_api_base_url(),
            token_url: default_token_url(),
            token_ttl_secs: default_token_ttl_secs(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl fmt::Debug for SpotifyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpotifyConfig")
            .field("client_id", &self.client_id)
            .field("user_id", &self.user_id)
            .field("api_base_url", &self.api_base_url)
            .field("token_url", &self.token_url)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// IDs per upstream lookup, 1..=50
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Attempts per request, first one included
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_transport_backoff_ms")]
    pub transport_backoff_ms: u64,
    #[serde(default = "default_inter_chunk_delay_ms")]
    pub inter_chunk_delay_ms: u64,
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}
fn default_max_retries() -> u32 {
    3
}
fn default_transport_backoff_ms() -> u64 {
    2_000
}
fn default_inter_chunk_delay_ms() -> u64 {
    500
}

impl FetchConfig {
    pub fn transport_backoff(&self) -> Duration {
        Duration::from_millis(self.transport_backoff_ms)
    }

    pub fn inter_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.inter_chunk_delay_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            transport_backoff_ms: default_transport_backoff_ms(),
            inter_chunk_delay_ms: default_inter_chunk_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for playlists, tracks and the curated list
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_artist_genres_ttl_secs")]
    pub artist_genres_ttl_secs: u64,
    #[serde(default = "default_recently_played_ttl_secs")]
    pub recently_played_ttl_secs: u64,
    /// Interval of the background expired-entry sweep
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_ttl_secs() -> u64 {
    3600
}
fn default_artist_genres_ttl_secs() -> u64 {
    24 * 3600
}
fn default_recently_played_ttl_secs() -> u64 {
    60
}
fn default_cleanup_interval_secs() -> u64 {
    300
}
fn default_history_capacity() -> usize {
    crate::history::DEFAULT_HISTORY_CAPACITY
}

impl CacheConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            artist_genres_ttl_secs: default_artist_genres_ttl_secs(),
            recently_played_ttl_secs: default_recently_played_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            history_capacity: default_history_capacity(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Default)]
pub struct AdminConfig {
    /// Expected `x-admin-identity` value; empty disables the admin surface.
    /// Prefer SPINSHELF__ADMIN__IDENTITY over the config file.
    #[serde(default)]
    pub identity: String,
}

impl fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminConfig")
            .field("enabled", &!self.identity.is_empty())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CuratedConfig {
    #[serde(default)]
    pub track_ids: Vec<String>,
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                // Try default root-level file
                let default_path = PathBuf::from("spinshelf.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., SPINSHELF__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("SPINSHELF")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("curated.track_ids"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
