use std::path::PathBuf;

use thiserror::Error;

/// TLS-specific error variants surfaced while loading client credentials.
#[derive(Debug, Error)]
pub enum TlsError {
    /// TLS has been enabled but no CA bundle path was provided.
    #[error("TLS is enabled but CA certificate path is not configured")]
    MissingCaPath,

    /// A client certificate was configured without its private key.
    #[error("Client certificate is configured but private key path is not")]
    MissingPrivateKeyPath,

    /// A client private key was configured without its certificate.
    #[error("Client private key is configured but certificate path is not")]
    MissingCertificatePath,

    /// The CA bundle could not be read.
    #[error("Failed to read CA certificate at {path}: {source}")]
    CaReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The client certificate file could not be read.
    #[error("Failed to read certificate at {path}: {source}")]
    CertificateReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The client private key file could not be read.
    #[error("Failed to read private key at {path}: {source}")]
    PrivateKeyReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file was read but holds no PEM block.
    #[error("File {path} does not contain a PEM block")]
    NotPem { path: PathBuf },
}
