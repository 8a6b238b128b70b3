use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tonic::transport::{Certificate, ClientTlsConfig, Identity};

use crate::{errors::TlsError, Result};

/// TLS credentials used when dialing the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTlsSettings {
    /// PEM bundle used to verify the control plane certificate.
    pub ca_cert_path: PathBuf,
    /// Client certificate presented for mTLS.
    #[serde(default)]
    pub client_cert_path: Option<PathBuf>,
    /// Private key matching `client_cert_path`.
    #[serde(default)]
    pub client_key_path: Option<PathBuf>,
    /// Overrides the server name checked against the certificate.
    #[serde(default)]
    pub domain_name: Option<String>,
}

impl ClientTlsSettings {
    /// Load client TLS settings from environment variables.
    pub fn from_env() -> Result<Option<Self>> {
        let enabled = std::env::var("FLOWPLANE_ADSC_TLS_ENABLED")
            .map(|value| is_truthy(&value))
            .unwrap_or(false);

        if !enabled {
            return Ok(None);
        }

        let ca_cert_path = non_empty_env("FLOWPLANE_ADSC_TLS_CA_PATH")
            .ok_or(TlsError::MissingCaPath)?;

        let settings = Self {
            ca_cert_path: PathBuf::from(ca_cert_path),
            client_cert_path: non_empty_env("FLOWPLANE_ADSC_TLS_CERT_PATH").map(PathBuf::from),
            client_key_path: non_empty_env("FLOWPLANE_ADSC_TLS_KEY_PATH").map(PathBuf::from),
            domain_name: non_empty_env("FLOWPLANE_ADSC_TLS_DOMAIN"),
        };
        settings.check_pairing()?;

        Ok(Some(settings))
    }

    /// A client certificate and its key must be configured together.
    pub fn check_pairing(&self) -> Result<()> {
        match (&self.client_cert_path, &self.client_key_path) {
            (Some(_), None) => Err(TlsError::MissingPrivateKeyPath.into()),
            (None, Some(_)) => Err(TlsError::MissingCertificatePath.into()),
            _ => Ok(()),
        }
    }

    /// Read the PEM files and build the tonic client TLS configuration.
    pub fn to_tonic(&self) -> Result<ClientTlsConfig> {
        self.check_pairing()?;

        let ca = read_pem(&self.ca_cert_path).map_err(|source| TlsError::CaReadError {
            path: self.ca_cert_path.clone(),
            source,
        })?;
        let mut tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(ca));

        if let (Some(cert_path), Some(key_path)) = (&self.client_cert_path, &self.client_key_path)
        {
            let cert = read_pem(cert_path).map_err(|source| TlsError::CertificateReadError {
                path: cert_path.clone(),
                source,
            })?;
            let key = read_pem(key_path).map_err(|source| TlsError::PrivateKeyReadError {
                path: key_path.clone(),
                source,
            })?;
            tls = tls.identity(Identity::from_pem(cert, key));
        }

        if let Some(domain) = &self.domain_name {
            tls = tls.domain_name(domain.clone());
        }

        Ok(tls)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn read_pem(path: &Path) -> std::io::Result<String> {
    let contents = std::fs::read_to_string(path)?;
    if !contents.contains("-----BEGIN") {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            TlsError::NotPem {
                path: path.to_path_buf(),
            }
            .to_string(),
        ));
    }
    Ok(contents)
}
