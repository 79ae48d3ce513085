//! Tracing subscriber setup for applications embedding this crate.
//!
//! The library itself only emits `tracing` events: statements at debug,
//! slow statements at info, failures at error. Call [`init_tracing`] once
//! from the application, or install any other subscriber.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset, e.g. `info` or `db_access=debug`.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Install a global subscriber writing to stderr.
///
/// Returns false when a global subscriber was already set.
pub fn init_tracing(config: &LogConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .is_ok()
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        let config = LogConfig::default();
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}
