use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;
use crate::error::BoardError;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Fails instead of
/// panicking when a global subscriber is already set.
pub fn try_init(logging: &LoggingConfig) -> Result<(), BoardError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&logging.level)));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|error| BoardError::Telemetry(error.to_string()))
}

fn default_directive(level: &str) -> String {
    format!("{level},board_xmpp={level},board_core={level}")
}
