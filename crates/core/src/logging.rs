//! tracing subscriber setup
//!
//! ```rust,ignore
//! context_dock_core::logging::init(&config.log);
//! tracing::info!(site = "Claude", "Session started");
//! ```

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogConfig;

/// Environment variable overriding the configured filter
pub const LOG_ENV: &str = "CONTEXT_DOCK_LOG";

static INSTALLED: OnceCell<bool> = OnceCell::new();

/// Install the global subscriber once. Returns `false` if this or another
/// subscriber was already installed.
pub fn init(config: &LogConfig) -> bool {
    let mut fresh = false;
    INSTALLED.get_or_init(|| {
        fresh = try_install(config);
        fresh
    });
    fresh
}

fn try_install(config: &LogConfig) -> bool {
    let filter = filter_for(config);

    let result = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .compact(),
            )
            .try_init()
    };

    result.is_ok()
}

fn filter_for(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
