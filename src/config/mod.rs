//! # Configuration Management
//!
//! Loads the harness configuration from `FLOWPLANE_ADSC_*` environment
//! variables or from a TOML file, and validates it before any session is
//! opened.

pub mod settings;
pub mod tls;

use std::path::Path;
use std::str::FromStr;

pub use settings::{AdscConfig, FleetConfig, IdentityConfig, LoggingConfig};
pub use tls::ClientTlsSettings;

use crate::errors::{AdscError, Result};

/// Environment variable naming a TOML configuration file
pub const CONFIG_FILE_ENV: &str = "FLOWPLANE_ADSC_CONFIG";

impl AdscConfig {
    /// Load from the file named by `FLOWPLANE_ADSC_CONFIG`, or from the environment.
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim()),
            _ => Self::from_env(),
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AdscError::io(e, format!("reading configuration file {}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let mut config = Self {
            address: env_string("FLOWPLANE_ADSC_ADDRESS")
                .unwrap_or(defaults.address),
            delta: env_parse("FLOWPLANE_ADSC_DELTA", defaults.delta)?,
            store_responses: env_parse("FLOWPLANE_ADSC_STORE_RESPONSES", defaults.store_responses)?,
            event_buffer: env_parse("FLOWPLANE_ADSC_EVENT_BUFFER", defaults.event_buffer)?,
            connect_timeout_seconds: env_parse(
                "FLOWPLANE_ADSC_CONNECT_TIMEOUT_SECONDS",
                defaults.connect_timeout_seconds,
            )?,
            tls: ClientTlsSettings::from_env()?,
            ..defaults
        };

        let identity = &mut config.identity;
        if let Some(node_type) = env_string("FLOWPLANE_ADSC_NODE_TYPE") {
            identity.node_type = node_type.parse()?;
        }
        if let Some(ip) = env_string("FLOWPLANE_ADSC_IP") {
            identity.ip = ip;
        }
        if let Some(workload) = env_string("FLOWPLANE_ADSC_WORKLOAD") {
            identity.workload = workload;
        }
        if let Some(namespace) = env_string("FLOWPLANE_ADSC_NAMESPACE") {
            identity.namespace = namespace;
        }
        if let Some(raw) = env_string("FLOWPLANE_ADSC_METADATA") {
            identity.metadata = match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(serde_json::Value::Object(map)) => map,
                Ok(_) => {
                    return Err(AdscError::validation_field(
                        "Metadata must be a JSON object",
                        "FLOWPLANE_ADSC_METADATA",
                    ))
                }
                Err(e) => {
                    return Err(AdscError::config_with_source(
                        "FLOWPLANE_ADSC_METADATA is not valid JSON",
                        Box::new(e),
                    ))
                }
            };
        }

        if let Some(level) = env_string("FLOWPLANE_ADSC_LOG_LEVEL") {
            config.logging.level = level;
        }
        config.logging.json = env_parse("FLOWPLANE_ADSC_LOG_JSON", config.logging.json)?;

        let fleet = &mut config.fleet;
        fleet.sessions = env_parse("FLOWPLANE_ADSC_SESSIONS", fleet.sessions)?;
        fleet.convergence_timeout_seconds = env_parse(
            "FLOWPLANE_ADSC_CONVERGENCE_TIMEOUT_SECONDS",
            fleet.convergence_timeout_seconds,
        )?;
        fleet.reconnect_initial_delay_ms = env_parse(
            "FLOWPLANE_ADSC_RECONNECT_INITIAL_MS",
            fleet.reconnect_initial_delay_ms,
        )?;
        fleet.reconnect_max_delay_ms = env_parse(
            "FLOWPLANE_ADSC_RECONNECT_MAX_MS",
            fleet.reconnect_max_delay_ms,
        )?;

        config.validate()?;
        Ok(config)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw.parse().map_err(|e| {
            AdscError::config(format!("Invalid value for {}: {}", key, e))
        }),
        None => Ok(default),
    }
}
