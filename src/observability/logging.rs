//! # Structured Logging
//!
//! Installs the `tracing-subscriber` stack and provides span macros for ADS
//! sessions. The client core only emits `tracing` events; whoever embeds it
//! decides which subscriber collects them.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::errors::{AdscError, Result};

/// Create a tracing span for an ADS session operation
#[macro_export]
macro_rules! adsc_span {
    ($operation:expr, $node_id:expr) => {
        tracing::info_span!(
            "adsc_operation",
            operation = %$operation,
            node_id = %$node_id,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $node_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "adsc_operation",
            operation = %$operation,
            node_id = %$node_id,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.level`. Returns `Ok(false)` when another
/// subscriber was installed first.
pub fn init_logging(config: &LoggingConfig) -> Result<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            AdscError::config(format!("Invalid log level '{}': {}", config.level, e))
        })?,
    };

    let installed = if config.json {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .try_init()
            .is_ok()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok()
    };

    Ok(installed)
}

/// Log configuration at startup
pub fn log_config_info(config: &crate::config::AdscConfig) {
    tracing::info!(
        address = %config.address,
        delta = config.delta,
        store_responses = config.store_responses,
        sessions = config.fleet.sessions,
        tls = config.tls.is_some(),
        node_type = %config.identity.node_type,
        namespace = %config.identity.namespace,
        "Flowplane ADS harness configuration"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macros_compile() {
        let _span = adsc_span!(
            "receive_loop",
            "sidecar~10.0.0.1~a.default~default.svc.cluster.local"
        );
        let _span = adsc_span!("watch", "node-1", type_url = "cds");
    }

    #[test]
    fn test_init_logging_twice_is_not_an_error() {
        let config = LoggingConfig::default();
        assert!(init_logging(&config).is_ok());
        assert!(!init_logging(&config).unwrap());
    }

    #[test]
    fn test_log_config_info() {
        let config = crate::config::AdscConfig::default();

        // This should not panic
        log_config_info(&config);
    }
}
