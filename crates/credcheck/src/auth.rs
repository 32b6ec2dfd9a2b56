//! Authentication modes and the credential material each one resolves to.

use crate::config::{AuthConfig, AuthMode, HubEndpoint};
use crate::error::{CredcheckError, Result};
use crate::sas::{self, DEFAULT_TOKEN_TTL};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    /// X.509 client certificate; username only, no password.
    Certificate {
        ca_cert: PathBuf,
        device_cert: PathBuf,
        device_key: PathBuf,
    },
    /// Shared access signature sent as the MQTT password.
    SharedAccessSignature {
        ca_cert: PathBuf,
        key: String,
        policy: Option<String>,
        ttl: Duration,
    },
}

/// Trust root plus optional client certificate and key, PEM encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub ca: Vec<u8>,
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_len", &self.ca.len())
            .field("client_auth", &self.client_auth.is_some())
            .finish()
    }
}

/// Everything the transport needs to open an authenticated session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub username: String,
    pub password: Option<String>,
    pub tls: TlsMaterial,
    /// Unix expiry of the SAS token, when one is used.
    pub token_expires_at: Option<u64>,
}

impl std::fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .field("token_expires_at", &self.token_expires_at)
            .finish()
    }
}

impl Authentication {
    #[must_use]
    pub fn certificate(
        ca_cert: impl Into<PathBuf>,
        device_cert: impl Into<PathBuf>,
        device_key: impl Into<PathBuf>,
    ) -> Self {
        Self::Certificate {
            ca_cert: ca_cert.into(),
            device_cert: device_cert.into(),
            device_key: device_key.into(),
        }
    }

    #[must_use]
    pub fn shared_access(
        ca_cert: impl Into<PathBuf>,
        key: impl Into<String>,
        policy: Option<String>,
    ) -> Self {
        Self::SharedAccessSignature {
            ca_cert: ca_cert.into(),
            key: key.into(),
            policy,
            ttl: DEFAULT_TOKEN_TTL,
        }
    }

    /// Selects the mode configured in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`CredcheckError::Configuration`] when SAS mode has no key.
    pub fn from_config(config: &AuthConfig, device_id: &str) -> Result<Self> {
        match config.mode {
            AuthMode::Certificate => Ok(Self::certificate(
                config.ca_cert.clone(),
                config.device_cert_path(device_id),
                config.device_key_path(device_id),
            )),
            AuthMode::Sas => {
                let key = config
                    .sas_key
                    .as_ref()
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| {
                        CredcheckError::Configuration(
                            "SAS authentication requires a shared access key".into(),
                        )
                    })?;
                Ok(Self::SharedAccessSignature {
                    ca_cert: config.ca_cert.clone(),
                    key: key.clone(),
                    policy: config.sas_policy.clone().filter(|p| !p.is_empty()),
                    ttl: config.token_ttl,
                })
            }
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Certificate { .. } => "X.509 certificate",
            Self::SharedAccessSignature { .. } => "SAS token",
        }
    }

    /// Loads certificate files or signs a token for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`CredcheckError::CredentialFile`] if a PEM file cannot be read,
    /// or [`CredcheckError::InvalidKey`] if the shared key is not base64.
    pub fn resolve(&self, endpoint: &HubEndpoint) -> Result<SessionCredentials> {
        let username = endpoint.username();
        match self {
            Self::Certificate {
                ca_cert,
                device_cert,
                device_key,
            } => {
                let tls = TlsMaterial {
                    ca: read_pem("CA certificate", ca_cert)?,
                    client_auth: Some((
                        read_pem("device certificate", device_cert)?,
                        read_pem("device key", device_key)?,
                    )),
                };
                debug!(cert = %device_cert.display(), "Loaded device certificate");
                Ok(SessionCredentials {
                    username,
                    password: None,
                    tls,
                    token_expires_at: None,
                })
            }
            Self::SharedAccessSignature {
                ca_cert,
                key,
                policy,
                ttl,
            } => {
                let uri = sas_resource_uri(endpoint, policy.as_deref());
                let token = sas::generate_sas_token(&uri, key, policy.as_deref(), *ttl)?;
                debug!(uri = %uri, expires_at = token.expires_at(), "Generated SAS token");
                let token_expires_at = Some(token.expires_at());
                Ok(SessionCredentials {
                    username,
                    password: Some(token.into_string()),
                    tls: TlsMaterial {
                        ca: read_pem("CA certificate", ca_cert)?,
                        client_auth: None,
                    },
                    token_expires_at,
                })
            }
        }
    }
}

/// Hub host for a hub-level policy, `<host>/devices/<device>` for a device key.
#[must_use]
pub fn sas_resource_uri(endpoint: &HubEndpoint, policy: Option<&str>) -> String {
    match policy {
        Some(p) if !p.is_empty() => endpoint.host.clone(),
        _ => format!("{}/devices/{}", endpoint.host, endpoint.device_id),
    }
}

fn read_pem(what: &'static str, path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| CredcheckError::CredentialFile {
        what,
        path: path.to_path_buf(),
        source,
    })
}
