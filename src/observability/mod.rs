//! # Observability Infrastructure
//!
//! Structured logging for the harness. Metrics and profiling servers are left
//! to the embedding process.

pub mod logging;

pub use logging::{init_logging, log_config_info};
