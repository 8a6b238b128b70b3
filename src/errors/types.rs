//! # Error Types
//!
//! Error taxonomy for ADS client sessions using `thiserror`.

use super::TlsError;

/// Custom result type for harness operations
pub type Result<T> = std::result::Result<T, AdscError>;

/// Main error type for the ADS client harness
#[derive(thiserror::Error, Debug)]
pub enum AdscError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Dial or stream-open failure; fatal to session creation
    #[error("Failed to connect to {address}: {message}")]
    Dial {
        address: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A request could not be handed to the stream
    #[error("Failed to send {type_url} request: {message}")]
    Send {
        type_url: String,
        message: String,
    },

    /// The inbound stream failed or reached EOF; terminal for the session
    #[error("Stream receive failed: {message}")]
    Recv {
        message: String,
        #[source]
        source: Option<tonic::Status>,
    },

    /// The session has been closed
    #[error("Session closed")]
    Closed,

    /// A single resource payload could not be decoded
    #[error("Failed to decode {type_url} resource: {message}")]
    Decode {
        type_url: String,
        message: String,
    },

    /// Node metadata could not be converted to a protobuf Struct
    #[error("Invalid node metadata: {message}")]
    InvalidMetadata {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Timeout errors
    #[error("Operation timed out: {operation} after {duration_ms}ms")]
    Timeout {
        operation: String,
        duration_ms: u64,
    },

    /// Client TLS credential errors
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
}

impl AdscError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a dial error
    pub fn dial<A: Into<String>, S: Into<String>>(address: A, message: S) -> Self {
        Self::Dial {
            address: address.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a dial error with source
    pub fn dial_with_source<A: Into<String>, S: Into<String>>(
        address: A,
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Dial {
            address: address.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a send error
    pub fn send<T: Into<String>, S: Into<String>>(type_url: T, message: S) -> Self {
        Self::Send {
            type_url: type_url.into(),
            message: message.into(),
        }
    }

    /// Create a receive error
    pub fn recv<S: Into<String>>(message: S) -> Self {
        Self::Recv {
            message: message.into(),
            source: None,
        }
    }

    /// Create a decode error
    pub fn decode<T: Into<String>, S: Into<String>>(type_url: T, message: S) -> Self {
        Self::Decode {
            type_url: type_url.into(),
            message: message.into(),
        }
    }

    /// Create an invalid metadata error
    pub fn invalid_metadata<S: Into<String>>(message: S) -> Self {
        Self::InvalidMetadata {
            message: message.into(),
            source: None,
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Create an I/O error with context
    pub fn io<S: Into<String>>(source: std::io::Error, context: S) -> Self {
        Self::Io {
            source,
            context: context.into(),
        }
    }

    /// Whether this error ends the session it was raised on
    pub fn is_terminal(&self) -> bool {
        matches!(self, AdscError::Recv { .. } | AdscError::Closed)
    }

    /// Check if a new session attempt may succeed after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdscError::Dial { .. }
                | AdscError::Recv { .. }
                | AdscError::Closed
                | AdscError::Timeout { .. }
                | AdscError::Io { .. }
        )
    }
}

// Error conversions for common external error types
impl From<std::io::Error> for AdscError {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            source: error,
            context: "I/O operation failed".to_string(),
        }
    }
}

impl From<serde_json::Error> for AdscError {
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidMetadata {
            message: "metadata is not representable as JSON".to_string(),
            source: Some(error),
        }
    }
}

impl From<toml::de::Error> for AdscError {
    fn from(error: toml::de::Error) -> Self {
        Self::config_with_source("Configuration file could not be parsed", Box::new(error))
    }
}

impl From<tonic::transport::Error> for AdscError {
    fn from(error: tonic::transport::Error) -> Self {
        Self::Dial {
            address: String::new(),
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }
}

impl From<tonic::Status> for AdscError {
    fn from(status: tonic::Status) -> Self {
        Self::Recv {
            message: format!("{:?}: {}", status.code(), status.message()),
            source: Some(status),
        }
    }
}

impl From<validator::ValidationErrors> for AdscError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages = Vec::new();
        collect_validation_messages("", &errors, &mut messages);
        messages.sort();

        Self::validation(format!("Validation failed: {}", messages.join("; ")))
    }
}

/// Flatten nested validator errors into `path: message` strings
fn collect_validation_messages(
    prefix: &str,
    errors: &validator::ValidationErrors,
    out: &mut Vec<String>,
) {
    use validator::ValidationErrorsKind;

    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };
        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                out.push(format!("{}: {}", path, error_messages.join(", ")));
            }
            ValidationErrorsKind::Struct(nested) => {
                collect_validation_messages(&path, nested, out);
            }
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_validation_messages(&format!("{}[{}]", path, index), nested, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = AdscError::config("Test configuration error");
        assert!(matches!(error, AdscError::Config { .. }));
        assert_eq!(
            error.to_string(),
            "Configuration error: Test configuration error"
        );
    }

    #[test]
    fn test_validation_error() {
        let error = AdscError::validation_field("must not be empty", "address");
        if let AdscError::Validation { field, .. } = error {
            assert_eq!(field, Some("address".to_string()));
        } else {
            panic!("expected validation error");
        }
    }

    #[test]
    fn test_dial_error_display() {
        let error = AdscError::dial("http://127.0.0.1:15010", "connection refused");
        assert_eq!(
            error.to_string(),
            "Failed to connect to http://127.0.0.1:15010: connection refused"
        );
    }

    #[test]
    fn test_terminal_errors() {
        assert!(AdscError::Closed.is_terminal());
        assert!(AdscError::recv("eof").is_terminal());
        assert!(!AdscError::send("cds", "full").is_terminal());
        assert!(!AdscError::decode("cds", "bad bytes").is_terminal());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(AdscError::dial("addr", "refused").is_retryable());
        assert!(AdscError::timeout("wait lds", 1000).is_retryable());
        assert!(!AdscError::invalid_metadata("not an object").is_retryable());
        assert!(!AdscError::validation("bad").is_retryable());
    }

    #[test]
    fn test_status_conversion() {
        let error: AdscError = tonic::Status::unavailable("server gone").into();
        assert!(matches!(error, AdscError::Recv { .. }));
        assert!(error.to_string().contains("server gone"));
    }

    #[test]
    fn test_error_conversions() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: AdscError = io_error.into();
        assert!(matches!(error, AdscError::Io { .. }));

        let toml_error = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let error: AdscError = toml_error.into();
        assert!(matches!(error, AdscError::Config { .. }));
    }
}
