//! Tracing subscriber setup.
//!
//! Embedders that install their own subscriber can skip this entirely; the
//! crate only emits `tracing` events.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. Fails with
/// [`Error::Config`] if a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config);

    if config.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true);
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
            .map_err(|e| Error::Config(e.to_string()))
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr);
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
            .map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails_cleanly() {
        let config = LoggingConfig {
            level: "kojible=debug".to_string(),
            json: false,
        };
        let _ = init_logging(&config);
        assert!(matches!(init_logging(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_level_falls_back() {
        let config = LoggingConfig {
            level: "[not a directive".to_string(),
            json: true,
        };
        let _ = build_filter(&config);
    }
}
