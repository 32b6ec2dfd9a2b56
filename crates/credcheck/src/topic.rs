//! Topic construction and parsing for the `$iothub/credentials` namespace.

/// Prefix of the certificate-issuance request topic.
pub const ISSUE_CERTIFICATE_PREFIX: &str = "$iothub/credentials/POST/issueCertificate/";

/// Multi-level wildcard filter matching every credential response topic.
pub const RESPONSE_FILTER: &str = "$iothub/credentials/res/#";

/// Status token the hub returns when it accepts a request for processing.
pub const STATUS_ACCEPTED: &str = "202";

/// Zero-based position of the status-code token in a response topic.
pub const STATUS_SEGMENT_INDEX: usize = 3;

const RID_KEY: &str = "$rid";
const VERSION_KEY: &str = "$version";

/// Builds `$iothub/credentials/POST/issueCertificate/?$rid=<correlation_id>`.
#[must_use]
pub fn issue_certificate_topic(correlation_id: u32) -> String {
    format!("{ISSUE_CERTIFICATE_PREFIX}?{RID_KEY}={correlation_id}")
}

/// Builds `$iothub/credentials/res/<status>/?$rid=<rid>&$version=<version>`.
#[must_use]
pub fn response_topic(status: &str, rid: &str, version: u32) -> String {
    format!("$iothub/credentials/res/{status}/?{RID_KEY}={rid}&{VERSION_KEY}={version}")
}

/// MQTT topic-filter matching with `+` and `#` wildcards.
///
/// A trailing `#` also matches the parent level, so `a/#` matches `a`.
#[must_use]
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Query parameter value from a topic of the form `.../?k=v&k2=v2`.
#[must_use]
pub fn query_param(topic: &str, key: &str) -> Option<String> {
    let (_, query) = topic.split_once('?')?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Correlation identifier echoed in a topic's query string.
#[must_use]
pub fn request_id(topic: &str) -> Option<String> {
    query_param(topic, RID_KEY)
}

/// A response topic split into its positional and query parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseTopic<'a> {
    pub segments: Vec<&'a str>,
    pub rid: Option<String>,
    pub version: Option<String>,
}

impl<'a> ResponseTopic<'a> {
    #[must_use]
    pub fn parse(topic: &'a str) -> Self {
        Self {
            segments: topic.split('/').collect(),
            rid: query_param(topic, RID_KEY),
            version: query_param(topic, VERSION_KEY),
        }
    }

    /// The status-code token, if the topic has enough segments to carry one.
    #[must_use]
    pub fn status_code(&self) -> Option<&'a str> {
        self.segments.get(STATUS_SEGMENT_INDEX).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_certificate_topic() {
        assert_eq!(
            issue_certificate_topic(999_888_777),
            "$iothub/credentials/POST/issueCertificate/?$rid=999888777"
        );
    }

    #[test]
    fn test_filter_matching() {
        assert!(topic_matches_filter(
            "$iothub/credentials/res/202/?$rid=1&$version=1",
            RESPONSE_FILTER
        ));
        assert!(topic_matches_filter("$iothub/credentials/res", RESPONSE_FILTER));
        assert!(topic_matches_filter("a/b/c", "a/+/c"));
        assert!(topic_matches_filter("a/b", "a/b"));

        assert!(!topic_matches_filter("$iothub/twin/res/200", RESPONSE_FILTER));
        assert!(!topic_matches_filter("a/b/c", "a/+"));
        assert!(!topic_matches_filter("a", "a/b"));
        assert!(!topic_matches_filter(
            "$iothub/credentials/POST/issueCertificate/?$rid=1",
            RESPONSE_FILTER
        ));
    }

    #[test]
    fn test_parse_response_topic() {
        let topic = "$iothub/credentials/res/202/?$rid=999888777&$version=1";
        let parsed = ResponseTopic::parse(topic);
        assert_eq!(parsed.status_code(), Some("202"));
        assert_eq!(parsed.rid.as_deref(), Some("999888777"));
        assert_eq!(parsed.version.as_deref(), Some("1"));
        assert_eq!(parsed.segments.len(), 5);
    }

    #[test]
    fn test_parse_short_topic() {
        let parsed = ResponseTopic::parse("$iothub/credentials/res");
        assert_eq!(parsed.status_code(), None);
        assert_eq!(parsed.rid, None);
    }

    #[test]
    fn test_response_topic_round_trip_rid() {
        let topic = response_topic("400", "17", 2);
        assert_eq!(topic, "$iothub/credentials/res/400/?$rid=17&$version=2");
        assert_eq!(request_id(&topic).as_deref(), Some("17"));
        assert_eq!(request_id(&issue_certificate_topic(17)).as_deref(), Some("17"));
    }
}
