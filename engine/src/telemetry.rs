//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for the router. Turn handling emits one span
//! per request; the subscriber decides how those spans are rendered.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber with the given log level from config.
///
/// Priority: `RUST_LOG` env var > `log_level` parameter > default "info"
///
/// Debug builds print human-readable lines; release builds emit JSON with the
/// current span attached so turn fields (`user_id`, `targets`) survive.
pub fn init_telemetry_with_level(log_level: &str) {
    let default_filter = format!(
        "warn,switchboard_engine={lvl},switchboard={lvl},tower_http={lvl}",
        lvl = log_level
    );

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().compact().with_target(true))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok();
    }
}
