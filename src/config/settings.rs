//! # Configuration Settings
//!
//! Defines the configuration structure consumed by ADS client sessions and the
//! fleet runner.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use super::ClientTlsSettings;
use crate::errors::{AdscError, Result};
use crate::xds::NodeType;

/// Main harness configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AdscConfig {
    /// Control plane address, including scheme (e.g. `http://istiod:15010`)
    #[validate(length(min = 1, message = "Address cannot be empty"))]
    pub address: String,

    /// Synthetic proxy identity
    #[validate(nested)]
    pub identity: IdentityConfig,

    /// Use the incremental (delta) ADS variant instead of state-of-the-world
    pub delta: bool,

    /// Keep the last decoded resources for inspection
    pub store_responses: bool,

    /// Capacity of the per-session event channel
    #[validate(range(
        min = 1,
        max = 10000,
        message = "Event buffer must be between 1 and 10000"
    ))]
    pub event_buffer: usize,

    /// Dial timeout in seconds
    #[validate(range(
        min = 1,
        max = 300,
        message = "Connect timeout must be between 1 and 300 seconds"
    ))]
    pub connect_timeout_seconds: u64,

    /// Client TLS credentials; plaintext when absent
    pub tls: Option<ClientTlsSettings>,

    /// Logging configuration
    #[validate(nested)]
    pub logging: LoggingConfig,

    /// Load generation settings
    #[validate(nested)]
    pub fleet: FleetConfig,
}

impl Default for AdscConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:15010".to_string(),
            identity: IdentityConfig::default(),
            delta: false,
            store_responses: false,
            event_buffer: 100,
            connect_timeout_seconds: 10,
            tls: None,
            logging: LoggingConfig::default(),
            fleet: FleetConfig::default(),
        }
    }
}

impl AdscConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(AdscError::from)?;
        self.validate_custom()?;
        Ok(())
    }

    /// Cross-field checks the validator derive cannot express
    fn validate_custom(&self) -> Result<()> {
        let has_scheme =
            self.address.starts_with("http://") || self.address.starts_with("https://");
        if !has_scheme {
            return Err(AdscError::validation_field(
                "Address must start with 'http://' or 'https://'",
                "address",
            ));
        }

        if let Some(tls) = &self.tls {
            if !self.address.starts_with("https://") {
                return Err(AdscError::validation_field(
                    "TLS settings require an 'https://' address",
                    "tls",
                ));
            }
            tls.check_pairing()?;
        }

        if self.fleet.reconnect_initial_delay_ms > self.fleet.reconnect_max_delay_ms {
            return Err(AdscError::validation_field(
                "Reconnect initial delay cannot exceed the maximum delay",
                "fleet.reconnect_initial_delay_ms",
            ));
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

/// Fields the node id and metadata are derived from
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct IdentityConfig {
    /// Proxy role
    pub node_type: NodeType,

    /// Proxy IP address
    #[validate(ip(message = "IP must be a valid IPv4 or IPv6 address"))]
    pub ip: String,

    /// Workload (pod) name
    #[validate(length(min = 1, message = "Workload cannot be empty"))]
    pub workload: String,

    /// Workload namespace
    #[validate(length(min = 1, message = "Namespace cannot be empty"))]
    pub namespace: String,

    /// Free-form node metadata
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            node_type: NodeType::Sidecar,
            ip: "10.0.0.1".to_string(),
            workload: "adsc".to_string(),
            namespace: "default".to_string(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Fleet (multi-session) configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FleetConfig {
    /// Number of concurrent sessions
    #[validate(range(
        min = 1,
        max = 100000,
        message = "Sessions must be between 1 and 100000"
    ))]
    pub sessions: usize,

    /// How long a session may take to receive its first CDS and LDS pushes
    #[validate(range(min = 1, message = "Convergence timeout must be at least 1 second"))]
    pub convergence_timeout_seconds: u64,

    /// First reconnect delay after a session closes
    #[validate(range(min = 1, message = "Reconnect delay must be at least 1ms"))]
    pub reconnect_initial_delay_ms: u64,

    /// Upper bound for reconnect delays
    #[validate(range(min = 1, message = "Reconnect max delay must be at least 1ms"))]
    pub reconnect_max_delay_ms: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            sessions: 1,
            convergence_timeout_seconds: 30,
            reconnect_initial_delay_ms: 200,
            reconnect_max_delay_ms: 10_000,
        }
    }
}

impl FleetConfig {
    pub fn convergence_timeout(&self) -> Duration {
        Duration::from_secs(self.convergence_timeout_seconds)
    }
}
