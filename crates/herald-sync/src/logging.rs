//! # Logging
//!
//! Tracing subscriber setup for hosts that do not install their own.
//!
//! ## Log Levels
//! - `RUST_LOG=debug` - Show debug messages
//! - `RUST_LOG=herald=trace` - Show trace for herald crates only
//! - Default: `info,herald=debug,sqlx=warn`
//!
//! The filter sits behind a reload layer so [`set_logging_enabled`] can turn
//! engine logging off and back on at runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_DIRECTIVES: &str = "info,herald=debug,sqlx=warn";

struct LoggingHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    directives: String,
}

static HANDLE: OnceLock<LoggingHandle> = OnceLock::new();
static ENABLED: AtomicBool = AtomicBool::new(true);

/// Installs the global subscriber.
///
/// Returns false if a subscriber was already installed (by this function or
/// by the host).
pub fn init_tracing() -> bool {
    let directives =
        std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_DIRECTIVES.to_string());
    let filter = EnvFilter::try_new(&directives)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let (filter_layer, handle) = reload::Layer::new(filter);

    let installed = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer())
        .try_init()
        .is_ok();

    if installed {
        let _ = HANDLE.set(LoggingHandle {
            filter: handle,
            directives,
        });
    }

    installed
}

/// Turns logging off or back on.
///
/// Returns false if the subscriber was not installed by [`init_tracing`].
pub fn set_logging_enabled(enabled: bool) -> bool {
    let Some(logging) = HANDLE.get() else {
        return false;
    };

    let filter = if enabled {
        EnvFilter::try_new(&logging.directives)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
    } else {
        EnvFilter::new("off")
    };

    let reloaded = logging.filter.reload(filter).is_ok();
    if reloaded {
        ENABLED.store(enabled, Ordering::Relaxed);
    }
    reloaded
}

/// Returns false after `set_logging_enabled(false)`.
pub fn logging_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}
