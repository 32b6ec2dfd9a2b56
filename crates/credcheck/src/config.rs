//! Run configuration: hub endpoint, authentication material and run settings.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration. The CLI layers environment variables and flags on top.

use crate::error::{CredcheckError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8883;
pub const DEFAULT_API_VERSION: &str = "2025-08-01-preview";
pub const DEFAULT_HUB_DOMAIN: &str = "azure-devices-int.net";
pub const DEFAULT_CA_CERT: &str = "../IoTHubRootCA.crt.pem";
pub const DEFAULT_SAS_POLICY: &str = "iothubowner";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubEndpoint {
    pub host: String,
    pub port: u16,
    pub device_id: String,
    pub api_version: String,
}

impl HubEndpoint {
    #[must_use]
    pub fn new(host: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            device_id: device_id.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// MQTT username: `<host>/<device>/?api-version=<version>`.
    #[must_use]
    pub fn username(&self) -> String {
        format!(
            "{}/{}/?api-version={}",
            self.host, self.device_id, self.api_version
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Full hostname; wins over `hub_name` + `hub_domain`.
    pub host: Option<String>,
    pub hub_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_domain: Option<String>,
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

impl HubConfig {
    /// Hostname from `host`, or `<hub_name>.<hub_domain>`.
    #[must_use]
    pub fn resolved_host(&self) -> Option<String> {
        if let Some(host) = self.host.as_ref().filter(|h| !h.is_empty()) {
            return Some(host.clone());
        }
        let name = self.hub_name.as_ref().filter(|n| !n.is_empty())?;
        let domain = self.hub_domain.as_deref().unwrap_or(DEFAULT_HUB_DOMAIN);
        Some(format!("{name}.{domain}"))
    }

    /// # Errors
    ///
    /// Returns [`CredcheckError::Configuration`] if the host or device id is missing.
    pub fn endpoint(&self) -> Result<HubEndpoint> {
        let host = self.resolved_host().ok_or_else(|| {
            CredcheckError::Configuration("hub host is required (set host or hub_name)".into())
        })?;
        let device = self
            .device_id
            .as_ref()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| CredcheckError::Configuration("device_id is required".into()))?;

        let mut endpoint = HubEndpoint::new(host, device.clone());
        if let Some(port) = self.port {
            endpoint = endpoint.with_port(port);
        }
        if let Some(version) = &self.api_version {
            endpoint = endpoint.with_api_version(version.clone());
        }
        Ok(endpoint)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    #[default]
    Certificate,
    Sas,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,

    #[serde(default = "default_ca_cert")]
    pub ca_cert: PathBuf,

    /// Defaults to `./certGen/certs/<device>.crt`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_cert: Option<PathBuf>,

    /// Defaults to `./certGen/private/<device>.key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_key: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sas_key: Option<String>,

    #[serde(default = "default_sas_policy")]
    pub sas_policy: Option<String>,

    #[serde(with = "humantime_serde", default = "default_token_ttl")]
    pub token_ttl: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::default(),
            ca_cert: default_ca_cert(),
            device_cert: None,
            device_key: None,
            sas_key: None,
            sas_policy: default_sas_policy(),
            token_ttl: default_token_ttl(),
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn device_cert_path(&self, device_id: &str) -> PathBuf {
        self.device_cert
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("./certGen/certs/{device_id}.crt")))
    }

    #[must_use]
    pub fn device_key_path(&self, device_id: &str) -> PathBuf {
        self.device_key
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("./certGen/private/{device_id}.key")))
    }
}

/// How strictly a response's `$rid` is matched against the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RidPolicy {
    /// A response carrying a different `$rid` is ignored.
    #[default]
    Strict,
    /// The first response on the filter is accepted.
    Lenient,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSettings {
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    /// Overrides the reconnect delay of scenarios that reconnect.
    #[serde(with = "humantime_serde", default, skip_serializing_if = "Option::is_none")]
    pub reconnect_delay: Option<Duration>,

    #[serde(default)]
    pub rid_policy: RidPolicy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csr_file: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            reconnect_delay: None,
            rid_policy: RidPolicy::default(),
            csr: None,
            csr_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredcheckConfig {
    pub hub: HubConfig,
    pub auth: AuthConfig,
    pub run: RunSettings,
}

impl CredcheckConfig {
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CredcheckError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// # Errors
    ///
    /// Returns [`CredcheckError::Configuration`] if `content` is not valid TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CredcheckError::Configuration(e.to_string()))
    }
}

fn default_ca_cert() -> PathBuf {
    PathBuf::from(DEFAULT_CA_CERT)
}

#[allow(clippy::unnecessary_wraps)]
fn default_sas_policy() -> Option<String> {
    Some(DEFAULT_SAS_POLICY.to_string())
}

fn default_token_ttl() -> Duration {
    crate::sas::DEFAULT_TOKEN_TTL
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}
