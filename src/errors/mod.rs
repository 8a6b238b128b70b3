//! # Error Handling
//!
//! Error types for ADS client sessions, configuration loading and client TLS.

pub mod tls;
pub mod types;

pub use tls::TlsError;
pub use types::{AdscError, Result};

/// Crate-wide error alias
pub type Error = AdscError;
