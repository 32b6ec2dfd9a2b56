use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CredcheckError>;

#[derive(Debug, Error)]
pub enum CredcheckError {
    #[error("Unknown scenario '{0}'")]
    UnknownScenario(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid shared access key: {0}")]
    InvalidKey(String),

    #[error("Invalid CSR: {0}")]
    InvalidCsr(String),

    #[error("Failed to read {what} from {}: {source}", path.display())]
    CredentialFile {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection refused with code {code}{}", reason.map(|r| format!(" ({r})")).unwrap_or_default())]
    ConnectionRefused {
        code: u8,
        reason: Option<&'static str>,
    },

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Request rejected by client queue: {0}")]
    RequestFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CredcheckError {
    /// Builds a [`CredcheckError::ConnectionRefused`] from a CONNACK return code.
    #[must_use]
    pub fn refused(code: u8) -> Self {
        Self::ConnectionRefused {
            code,
            reason: connack_reason(code),
        }
    }
}

/// Human-readable cause for an MQTT 3.1.1 CONNACK refusal code.
#[must_use]
pub fn connack_reason(code: u8) -> Option<&'static str> {
    match code {
        1 => Some("Incorrect protocol version"),
        2 => Some("Invalid client identifier"),
        3 => Some("Server unavailable"),
        4 => Some("Bad username or password"),
        5 => Some("Not authorized"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CredcheckError::UnknownScenario("nope".to_string());
        assert_eq!(err.to_string(), "Unknown scenario 'nope'");

        let err = CredcheckError::refused(5);
        assert_eq!(
            err.to_string(),
            "Connection refused with code 5 (Not authorized)"
        );

        let err = CredcheckError::refused(42);
        assert_eq!(err.to_string(), "Connection refused with code 42");
    }

    #[test]
    fn test_connack_reasons() {
        assert_eq!(connack_reason(0), None);
        assert_eq!(connack_reason(1), Some("Incorrect protocol version"));
        assert_eq!(connack_reason(3), Some("Server unavailable"));
        assert_eq!(connack_reason(4), Some("Bad username or password"));
    }

    #[test]
    fn test_credential_file_names_path() {
        let err = CredcheckError::CredentialFile {
            what: "device key",
            path: PathBuf::from("/tmp/dev.key"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().starts_with("Failed to read device key from /tmp/dev.key"));
    }
}
