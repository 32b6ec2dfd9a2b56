//! Scenario definitions and the name → constructor registry.
//!
//! A scenario fixes the request a run publishes, the filter it listens on,
//! whether the client drops the connection after the publish is acknowledged,
//! and how a response topic is judged.

use crate::error::{CredcheckError, Result};
use crate::topic::{self, ResponseTopic, STATUS_ACCEPTED};
use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Placeholder CSR (`"MOCK CSR"` base64 encoded) sent when no real one is supplied.
pub const MOCK_CSR: &str = "TU9DSyBDU1I=";

/// Reconnect delay used by the disconnect/reconnect scenario.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

const MAX_CORRELATION_ID: u32 = 99_999_999;

/// Body of an `issueCertificate` request.
#[derive(Debug, Clone, Serialize)]
pub struct IssueCertificatePayload<'a> {
    pub id: &'a str,
    pub csr: &'a str,
}

/// The request half of a scenario, built once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub correlation_id: u32,
    pub publish_topic: String,
    pub payload: Vec<u8>,
    pub subscribe_filter: String,
}

impl CertificateRequest {
    /// Builds a request with a freshly drawn correlation id.
    ///
    /// # Errors
    ///
    /// Returns [`CredcheckError::Serialization`] if the payload cannot be encoded.
    pub fn new(device_id: &str, csr: &str) -> Result<Self> {
        Self::with_correlation_id(device_id, csr, generate_correlation_id())
    }

    /// # Errors
    ///
    /// Returns [`CredcheckError::Serialization`] if the payload cannot be encoded.
    pub fn with_correlation_id(device_id: &str, csr: &str, correlation_id: u32) -> Result<Self> {
        let payload = serde_json::to_vec(&IssueCertificatePayload { id: device_id, csr })?;
        Ok(Self {
            correlation_id,
            publish_topic: topic::issue_certificate_topic(correlation_id),
            payload,
            subscribe_filter: topic::RESPONSE_FILTER.to_string(),
        })
    }
}

/// Random correlation id in `1..=99_999_999`.
#[must_use]
pub fn generate_correlation_id() -> u32 {
    rand::rng().random_range(1..=MAX_CORRELATION_ID)
}

/// Result of judging a response topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub success: bool,
    pub message: String,
}

impl Validation {
    #[must_use]
    pub fn passed(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Capability set the run controller is polymorphic over.
pub trait Scenario: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn request(&self) -> &CertificateRequest;

    fn correlation_id(&self) -> u32 {
        self.request().correlation_id
    }

    fn publish_topic(&self) -> &str {
        &self.request().publish_topic
    }

    fn payload(&self) -> &[u8] {
        &self.request().payload
    }

    fn subscribe_filter(&self) -> &str {
        &self.request().subscribe_filter
    }

    /// Whether the client unsubscribes and disconnects once the publish is acknowledged.
    fn disconnect_after_publish(&self) -> bool {
        false
    }

    fn reconnect_delay(&self) -> Duration {
        Duration::ZERO
    }

    /// Judges a response. Must not panic on malformed topics.
    fn validate_response(&self, topic: &str, payload: &[u8]) -> Validation;
}

fn validate_status(topic: &str, success_message: impl FnOnce() -> String) -> Validation {
    match ResponseTopic::parse(topic).status_code() {
        Some(STATUS_ACCEPTED) => Validation::passed(success_message()),
        Some(code) => Validation::failed(format!(
            "✗ FAILURE: Expected status code {STATUS_ACCEPTED}, got {code}"
        )),
        None => Validation::failed("✗ FAILURE: Could not parse status code from topic"),
    }
}

/// Publishes the request and expects a `202` on the response topic.
#[derive(Debug, Clone)]
pub struct HappyPath {
    request: CertificateRequest,
}

impl HappyPath {
    pub const NAME: &'static str = "happy_path";
    pub const DESCRIPTION: &'static str = "Send issueCertificate request and expect 202 response";

    #[must_use]
    pub fn new(request: CertificateRequest) -> Self {
        Self { request }
    }
}

impl Scenario for HappyPath {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        Self::DESCRIPTION
    }

    fn request(&self) -> &CertificateRequest {
        &self.request
    }

    fn validate_response(&self, topic: &str, _payload: &[u8]) -> Validation {
        validate_status(topic, || {
            format!("✓ SUCCESS: Received expected status code {STATUS_ACCEPTED}")
        })
    }
}

/// Publishes, drops the connection after PUBACK, reconnects and expects the
/// pending `202` to be delivered on the new session.
#[derive(Debug, Clone)]
pub struct DisconnectReconnect {
    request: CertificateRequest,
    reconnect_delay: Duration,
}

impl DisconnectReconnect {
    pub const NAME: &'static str = "disconnect_reconnect";
    pub const DESCRIPTION: &'static str =
        "Send request, disconnect after PUBACK, reconnect and expect 202 response";

    #[must_use]
    pub fn new(request: CertificateRequest) -> Self {
        Self {
            request,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

impl Scenario for DisconnectReconnect {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        Self::DESCRIPTION
    }

    fn request(&self) -> &CertificateRequest {
        &self.request
    }

    fn disconnect_after_publish(&self) -> bool {
        true
    }

    fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    fn validate_response(&self, topic: &str, _payload: &[u8]) -> Validation {
        validate_status(topic, || {
            format!(
                "✓ SUCCESS: Received response after reconnection (status code {STATUS_ACCEPTED})"
            )
        })
    }
}

/// Inputs every scenario constructor draws from.
#[derive(Debug, Clone)]
pub struct ScenarioContext {
    pub device_id: String,
    pub csr: String,
    pub reconnect_delay: Option<Duration>,
    pub correlation_id: Option<u32>,
}

impl ScenarioContext {
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            csr: MOCK_CSR.to_string(),
            reconnect_delay: None,
            correlation_id: None,
        }
    }

    #[must_use]
    pub fn with_csr(mut self, csr: impl Into<String>) -> Self {
        self.csr = csr.into();
        self
    }

    /// Overrides the reconnect delay of scenarios that reconnect.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = Some(delay);
        self
    }

    /// Pins the correlation id instead of drawing a random one.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: u32) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    fn request(&self) -> Result<CertificateRequest> {
        match self.correlation_id {
            Some(id) => CertificateRequest::with_correlation_id(&self.device_id, &self.csr, id),
            None => CertificateRequest::new(&self.device_id, &self.csr),
        }
    }
}

/// Registry entry: a scenario name bound to its constructor.
#[derive(Clone, Copy)]
pub struct ScenarioEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub build: fn(&ScenarioContext) -> Result<Box<dyn Scenario>>,
}

fn build_happy_path(ctx: &ScenarioContext) -> Result<Box<dyn Scenario>> {
    Ok(Box::new(HappyPath::new(ctx.request()?)))
}

fn build_disconnect_reconnect(ctx: &ScenarioContext) -> Result<Box<dyn Scenario>> {
    let mut scenario = DisconnectReconnect::new(ctx.request()?);
    if let Some(delay) = ctx.reconnect_delay {
        scenario = scenario.with_reconnect_delay(delay);
    }
    Ok(Box::new(scenario))
}

pub static SCENARIOS: &[ScenarioEntry] = &[
    ScenarioEntry {
        name: HappyPath::NAME,
        description: HappyPath::DESCRIPTION,
        build: build_happy_path,
    },
    ScenarioEntry {
        name: DisconnectReconnect::NAME,
        description: DisconnectReconnect::DESCRIPTION,
        build: build_disconnect_reconnect,
    },
];

#[must_use]
pub fn find(name: &str) -> Option<&'static ScenarioEntry> {
    SCENARIOS.iter().find(|entry| entry.name == name)
}

#[must_use]
pub fn scenario_names() -> Vec<&'static str> {
    SCENARIOS.iter().map(|entry| entry.name).collect()
}

/// Looks up `name` and constructs the scenario.
///
/// # Errors
///
/// Returns [`CredcheckError::UnknownScenario`] for unregistered names, or the
/// constructor's error if the request cannot be built.
pub fn build_scenario(name: &str, ctx: &ScenarioContext) -> Result<Box<dyn Scenario>> {
    let entry = find(name).ok_or_else(|| CredcheckError::UnknownScenario(name.to_string()))?;
    (entry.build)(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = CertificateRequest::with_correlation_id("dev-1", MOCK_CSR, 42).unwrap();
        assert_eq!(
            request.publish_topic,
            "$iothub/credentials/POST/issueCertificate/?$rid=42"
        );
        assert_eq!(request.subscribe_filter, "$iothub/credentials/res/#");
        assert_eq!(
            std::str::from_utf8(&request.payload).unwrap(),
            r#"{"id":"dev-1","csr":"TU9DSyBDU1I="}"#
        );
    }

    #[test]
    fn test_correlation_id_range() {
        for _ in 0..1000 {
            let id = generate_correlation_id();
            assert!((1..=MAX_CORRELATION_ID).contains(&id));
        }
    }

    #[test]
    fn test_registry_lookup() {
        assert_eq!(scenario_names(), vec!["happy_path", "disconnect_reconnect"]);
        assert!(find("happy_path").is_some());
        assert!(find("HAPPY_PATH").is_none());
    }

    #[test]
    fn test_build_unknown_scenario() {
        let err = build_scenario("nope", &ScenarioContext::new("dev")).unwrap_err();
        assert!(matches!(err, CredcheckError::UnknownScenario(name) if name == "nope"));
    }

    #[test]
    fn test_disconnect_reconnect_flags() {
        let ctx = ScenarioContext::new("dev").with_correlation_id(7);
        let scenario = build_scenario("disconnect_reconnect", &ctx).unwrap();
        assert!(scenario.disconnect_after_publish());
        assert_eq!(scenario.reconnect_delay(), DEFAULT_RECONNECT_DELAY);
        assert_eq!(scenario.correlation_id(), 7);

        let ctx = ctx.with_reconnect_delay(Duration::from_millis(50));
        let scenario = build_scenario("disconnect_reconnect", &ctx).unwrap();
        assert_eq!(scenario.reconnect_delay(), Duration::from_millis(50));
    }

    #[test]
    fn test_happy_path_flags() {
        let scenario = build_scenario("happy_path", &ScenarioContext::new("dev")).unwrap();
        assert!(!scenario.disconnect_after_publish());
        assert_eq!(scenario.reconnect_delay(), Duration::ZERO);
    }

    #[test]
    fn test_reconnect_success_message() {
        let request = CertificateRequest::with_correlation_id("dev", MOCK_CSR, 1).unwrap();
        let scenario = DisconnectReconnect::new(request);
        let validation =
            scenario.validate_response("$iothub/credentials/res/202/?$rid=1&$version=1", b"");
        assert!(validation.success);
        assert!(validation.message.contains("after reconnection"));
    }

    #[test]
    fn test_registry_descriptions_match_scenarios() {
        let ctx = ScenarioContext::new("dev");
        for entry in SCENARIOS {
            let scenario = (entry.build)(&ctx).unwrap();
            assert_eq!(scenario.name(), entry.name);
            assert_eq!(scenario.description(), entry.description);
        }
    }
}
