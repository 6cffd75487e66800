//! Tracing installation.
//!
//! Every crate in the workspace reports through [`tracing`]. Applications that
//! do not install their own subscriber can call [`install`] once at startup.

use std::{
    str::FromStr,
    sync::{Mutex, Once, OnceLock},
};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload, util::SubscriberInitExt};

const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::INFO;

// ============================================================================
// Global State
// ============================================================================

static TRACING_INSTALLED: Once = Once::new();
static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();
static REQUESTED_LEVEL: Mutex<Option<LevelFilter>> = Mutex::new(None);

fn requested_level() -> LevelFilter {
    REQUESTED_LEVEL
        .lock()
        .ok()
        .and_then(|guard| *guard)
        .unwrap_or(DEFAULT_LOG_LEVEL)
}

// ============================================================================
// Installation
// ============================================================================

/// Installs a global subscriber writing formatted events to stderr (idempotent).
///
/// Filtering follows `RUST_LOG` when it is set, otherwise the level given to
/// [`set_level`], otherwise `info`.
pub fn install() {
    TRACING_INSTALLED.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(requested_level().to_string()));
        let (filter, handle) = reload::Layer::new(filter);

        let result = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init();

        if result.is_err() {
            eprintln!("arbor: a global tracing subscriber is already installed");
            return;
        }
        if FILTER_HANDLE.set(handle).is_err() {
            eprintln!("arbor: tracing filter handle was already set");
        }
    });
}

/// Changes the maximum level of recorded events.
///
/// Unknown levels fall back to `info`. Called before [`install`], the level
/// becomes the default filter.
pub fn set_level(level: &str) {
    let parsed = LevelFilter::from_str(level).unwrap_or(DEFAULT_LOG_LEVEL);
    if let Ok(mut guard) = REQUESTED_LEVEL.lock() {
        *guard = Some(parsed);
    }
    if let Some(handle) = FILTER_HANDLE.get() {
        if handle.reload(EnvFilter::new(parsed.to_string())).is_err() {
            eprintln!("arbor: failed to update the tracing filter");
        }
    }
}
