//! The result of a run, produced exactly once.

use crate::topic::ResponseTopic;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The session could not be established.
    Connection,
    /// A response arrived but did not carry the expected status.
    Validation,
    Timeout,
    Interrupted,
}

/// An inbound response as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, qos: u8) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
        }
    }

    /// Payload decoded as UTF-8, with invalid sequences replaced.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    #[must_use]
    pub fn parsed_topic(&self) -> ResponseTopic<'_> {
        ResponseTopic::parse(&self.topic)
    }

    #[must_use]
    pub fn snapshot(&self) -> ResponseSnapshot {
        let parsed = self.parsed_topic();
        ResponseSnapshot {
            topic: self.topic.clone(),
            payload: self.text(),
            payload_len: self.payload.len(),
            qos: self.qos,
            status_code: parsed.status_code().map(str::to_string),
            rid: parsed.rid,
            version: parsed.version,
        }
    }
}

/// What the report shows of the accepted response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseSnapshot {
    pub topic: String,
    pub payload: String,
    pub payload_len: usize,
    pub qos: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub scenario: String,
    pub correlation_id: u32,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSnapshot>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl RunOutcome {
    /// Outcome of validating a received response.
    #[must_use]
    pub fn validated(
        scenario: &str,
        correlation_id: u32,
        success: bool,
        message: impl Into<String>,
        response: ResponseSnapshot,
    ) -> Self {
        Self {
            scenario: scenario.to_string(),
            correlation_id,
            success,
            message: message.into(),
            failure: (!success).then_some(FailureKind::Validation),
            response: Some(response),
            elapsed: Duration::ZERO,
        }
    }

    /// A run that ended without a validated response.
    #[must_use]
    pub fn failed(
        scenario: &str,
        correlation_id: u32,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            scenario: scenario.to_string(),
            correlation_id,
            success: false,
            message: message.into(),
            failure: Some(kind),
            response: None,
            elapsed: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Process exit status: 0 on validated success, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_from_envelope() {
        let envelope = ResponseEnvelope::new(
            "$iothub/credentials/res/202/?$rid=5&$version=1",
            b"{\"ok\":true}".to_vec(),
            1,
        );
        let snapshot = envelope.snapshot();
        assert_eq!(snapshot.status_code.as_deref(), Some("202"));
        assert_eq!(snapshot.rid.as_deref(), Some("5"));
        assert_eq!(snapshot.version.as_deref(), Some("1"));
        assert_eq!(snapshot.payload_len, 11);
    }

    #[test]
    fn test_lossy_text() {
        let envelope = ResponseEnvelope::new("t", vec![0x66, 0xff, 0x6f], 0);
        assert_eq!(envelope.text(), "f\u{fffd}o");
    }

    #[test]
    fn test_exit_codes() {
        let ok = RunOutcome::validated(
            "happy_path",
            1,
            true,
            "ok",
            ResponseEnvelope::new("t", vec![], 1).snapshot(),
        );
        assert_eq!(ok.exit_code(), 0);
        assert_eq!(ok.failure, None);

        let bad = RunOutcome::failed("happy_path", 1, FailureKind::Timeout, "timeout");
        assert_eq!(bad.exit_code(), 1);
        assert_eq!(bad.failure, Some(FailureKind::Timeout));
    }

    #[test]
    fn test_json_shape() {
        let outcome = RunOutcome::failed("happy_path", 9, FailureKind::Interrupted, "stop")
            .with_elapsed(Duration::from_millis(1500));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["failure"], "interrupted");
        assert_eq!(json["elapsed"], "1s 500ms");
        assert!(json.get("response").is_none());
    }
}
