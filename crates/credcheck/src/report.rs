//! Text and JSON rendering of a [`RunOutcome`].

use crate::outcome::RunOutcome;
use std::fmt::Write;

const RULE_WIDTH: usize = 70;

pub struct OutcomeReport<'a> {
    outcome: &'a RunOutcome,
}

impl<'a> OutcomeReport<'a> {
    #[must_use]
    pub fn new(outcome: &'a RunOutcome) -> Self {
        Self { outcome }
    }

    /// Response block (when one was received) followed by the verdict.
    #[must_use]
    pub fn generate_text(&self) -> String {
        let rule = "=".repeat(RULE_WIDTH);
        let mut out = String::new();

        if let Some(response) = &self.outcome.response {
            let _ = writeln!(out, "{rule}");
            out.push_str("✓ RESPONSE RECEIVED!\n");
            let _ = writeln!(out, "{rule}");
            let _ = writeln!(out, "Topic: {}", response.topic);
            let _ = writeln!(out, "QoS: {}", response.qos);
            let _ = writeln!(out, "Payload length: {} bytes", response.payload_len);
            if response.payload.is_empty() {
                out.push_str("Payload: (empty)\n");
            } else {
                let _ = writeln!(out, "Payload: {}", response.payload);
            }
            if let Some(code) = &response.status_code {
                let _ = writeln!(out, "\nStatus Code: {code}");
            }
            let _ = writeln!(out, "\n{}", self.outcome.message);
            let _ = writeln!(out, "{rule}");
        } else {
            let _ = writeln!(out, "{}", self.outcome.message);
        }

        let verdict = if self.outcome.success { "PASSED" } else { "FAILED" };
        let _ = writeln!(
            out,
            "\nScenario {} {verdict} (rid {}, {})",
            self.outcome.scenario,
            self.outcome.correlation_id,
            humantime::format_duration(truncate_millis(self.outcome.elapsed))
        );
        out
    }

    /// # Errors
    ///
    /// Returns an error if the outcome cannot be serialized.
    pub fn generate_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self.outcome)
    }
}

fn truncate_millis(d: std::time::Duration) -> std::time::Duration {
    std::time::Duration::from_millis(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{FailureKind, ResponseEnvelope};
    use std::time::Duration;

    #[test]
    fn test_text_with_response() {
        let envelope = ResponseEnvelope::new(
            "$iothub/credentials/res/202/?$rid=3&$version=1",
            Vec::new(),
            1,
        );
        let outcome = RunOutcome::validated("happy_path", 3, true, "✓ SUCCESS", envelope.snapshot())
            .with_elapsed(Duration::from_millis(1234));
        let text = OutcomeReport::new(&outcome).generate_text();
        assert!(text.contains("✓ RESPONSE RECEIVED!"));
        assert!(text.contains("Payload: (empty)"));
        assert!(text.contains("Status Code: 202"));
        assert!(text.contains("Scenario happy_path PASSED (rid 3, 1s 234ms)"));
    }

    #[test]
    fn test_text_without_response() {
        let outcome = RunOutcome::failed(
            "happy_path",
            3,
            FailureKind::Timeout,
            "✗ Timeout: No response received after 15 seconds",
        );
        let text = OutcomeReport::new(&outcome).generate_text();
        assert!(!text.contains("RESPONSE RECEIVED"));
        assert!(text.starts_with("✗ Timeout"));
        assert!(text.contains("FAILED"));
    }

    #[test]
    fn test_json_report() {
        let outcome = RunOutcome::failed("happy_path", 3, FailureKind::Connection, "refused");
        let json = OutcomeReport::new(&outcome).generate_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["failure"], "connection");
    }
}
