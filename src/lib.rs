//! # Flowplane ADSC
//!
//! Load and consistency harness for Envoy xDS control planes. It opens many
//! Aggregated Discovery Service sessions, each posing as a different proxy,
//! and measures how quickly and how consistently the control plane converges
//! them.
//!
//! ## Architecture
//!
//! ```text
//! Fleet → AdsSession (SotW | Delta) → AdsTransport → control plane
//!              ↓
//!   WatchTable + ResponseStore → EventChannel → caller
//! ```
//!
//! ## Core Components
//!
//! - **xDS client**: node identity, transport, watch table, dependency
//!   extraction and the SotW / Delta state machines
//! - **Fleet**: concurrent sessions with reconnect backoff and a convergence report
//! - **Configuration**: TOML or `FLOWPLANE_ADSC_*` environment variables
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use flowplane_adsc::{xds, AdscConfig, Event, ResourceType, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = AdscConfig::from_env()?;
//!     let session = xds::connect(&config).await?;
//!     session
//!         .wait(Some(Event::Update(ResourceType::Listener)), Duration::from_secs(10))
//!         .await?;
//!     session.close();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod errors;
pub mod fleet;
pub mod observability;
pub mod xds;

// Re-export commonly used types and traits
pub use config::AdscConfig;
pub use errors::{AdscError, Error, Result};
pub use fleet::{Fleet, FleetReport};
pub use observability::init_logging;
pub use xds::{AdsClient, AdsSession, DeltaAdsClient, Event, ResourceType};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
