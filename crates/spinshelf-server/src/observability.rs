//! Log output for the service.
//!
//! The subscriber starts at [`STARTUP_LOG_LEVEL`] so configuration loading
//! is visible, then [`apply_logging_level`] swaps in `logging.level` once the
//! config is known. `RUST_LOG` overrides both.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

pub const STARTUP_LOG_LEVEL: &str = "info";

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

fn env_override() -> Option<EnvFilter> {
    std::env::var_os("RUST_LOG")?;
    EnvFilter::try_from_default_env().ok()
}

pub fn init_tracing() {
    let filter = env_override().unwrap_or_else(|| EnvFilter::new(STARTUP_LOG_LEVEL));
    let (filter_layer, handle) = reload::Layer::new(filter);
    let _ = FILTER_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer())
        .try_init();
}

/// Switches to the configured level. Returns `false` when the level was not
/// applied: `RUST_LOG` is set, or tracing was never initialised.
pub fn apply_logging_level(level: &str) -> bool {
    if std::env::var_os("RUST_LOG").is_some() {
        return false;
    }
    let Some(handle) = FILTER_HANDLE.get() else {
        return false;
    };
    handle.modify(|f| *f = EnvFilter::new(level)).is_ok()
}
