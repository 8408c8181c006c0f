use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::TracingConfig;
use crate::error::ConfigError;

/// Install the global subscriber. `RUST_LOG` wins over `config.level`.
pub fn init_tracing(config: &TracingConfig) -> Result<(), ConfigError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(false),
            )
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .try_init()
    };
    result.map_err(|e| ConfigError::Tracing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // The only test in this crate that touches the global subscriber.
    #[test]
    fn installs_once_then_reports_the_conflict() {
        let config = TracingConfig {
            level: "warn".into(),
            json: true,
        };
        assert!(init_tracing(&config).is_ok());
        tracing::warn!(target: "covenant_loop::telemetry", "subscriber installed");
        assert!(matches!(
            init_tracing(&TracingConfig::default()),
            Err(ConfigError::Tracing(_))
        ));
    }
}
