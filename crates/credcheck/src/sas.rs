//! Shared-access-signature tokens for password-based hub authentication.
//!
//! A token signs `"<resource-uri>\n<expiry>"` with HMAC-SHA256 under the
//! base64-decoded shared key. The signature is base64 encoded and then
//! form-urlencoded:
//!
//! ```text
//! SharedAccessSignature sr=<uri>&sig=<signature>&se=<expiry>[&skn=<policy>]
//! ```
//!
//! Generation is a one-shot operation; nothing here refreshes tokens.

use crate::error::{CredcheckError, Result};
use base64::prelude::*;
use ring::hmac;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default token validity window.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasToken {
    token: String,
    expires_at: u64,
}

impl SasToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Absolute expiry as Unix seconds, as embedded in `se=`.
    #[must_use]
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.token
    }
}

impl fmt::Display for SasToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

/// Generates a token valid for `ttl` from now.
///
/// # Errors
///
/// Returns [`CredcheckError::InvalidKey`] if `key` is not valid base64, or
/// [`CredcheckError::Configuration`] if `ttl` pushes the expiry past `u64`.
pub fn generate_sas_token(
    uri: &str,
    key: &str,
    policy_name: Option<&str>,
    ttl: Duration,
) -> Result<SasToken> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| CredcheckError::Configuration(format!("system clock before epoch: {e}")))?;
    let expires_at = now
        .as_secs()
        .checked_add(ttl.as_secs())
        .ok_or_else(|| CredcheckError::Configuration("token expiry overflows".to_string()))?;
    sign_sas_token(uri, key, policy_name, expires_at)
}

/// Signs a token with an explicit absolute expiry.
///
/// Deterministic for identical inputs.
///
/// # Errors
///
/// Returns [`CredcheckError::InvalidKey`] if `key` is not valid base64.
pub fn sign_sas_token(
    uri: &str,
    key: &str,
    policy_name: Option<&str>,
    expires_at: u64,
) -> Result<SasToken> {
    let decoded_key = BASE64_STANDARD
        .decode(key.trim())
        .map_err(|e| CredcheckError::InvalidKey(e.to_string()))?;
    if decoded_key.is_empty() {
        return Err(CredcheckError::InvalidKey("key is empty".to_string()));
    }

    let string_to_sign = format!("{uri}\n{expires_at}");
    let key = hmac::Key::new(hmac::HMAC_SHA256, &decoded_key);
    let tag = hmac::sign(&key, string_to_sign.as_bytes());

    let signature_b64 = BASE64_STANDARD.encode(tag.as_ref());
    let signature: String = url::form_urlencoded::byte_serialize(signature_b64.as_bytes()).collect();

    let token = match policy_name.filter(|p| !p.is_empty()) {
        Some(policy) => format!(
            "SharedAccessSignature sr={uri}&sig={signature}&se={expires_at}&skn={policy}"
        ),
        None => format!("SharedAccessSignature sr={uri}&sig={signature}&se={expires_at}"),
    };

    Ok(SasToken { token, expires_at })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "c2VjcmV0LWtleS1mb3ItdGVzdHM=";

    #[test]
    fn test_token_shape_with_policy() {
        let token = sign_sas_token("hub.example.net", KEY, Some("iothubowner"), 1_700_000_000)
            .unwrap();
        let s = token.as_str();
        assert!(s.starts_with("SharedAccessSignature sr=hub.example.net&sig="));
        assert!(s.ends_with("&se=1700000000&skn=iothubowner"));
        assert_eq!(token.expires_at(), 1_700_000_000);
    }

    #[test]
    fn test_token_without_policy_has_no_skn() {
        let token = sign_sas_token("hub.example.net/devices/d1", KEY, None, 10).unwrap();
        assert!(!token.as_str().contains("skn="));
        assert!(token.as_str().ends_with("&se=10"));

        let empty_policy = sign_sas_token("hub.example.net/devices/d1", KEY, Some(""), 10).unwrap();
        assert_eq!(token, empty_policy);
    }

    #[test]
    fn test_signature_is_url_encoded() {
        let token = sign_sas_token("hub.example.net", KEY, None, 1_700_000_000).unwrap();
        let sig = token
            .as_str()
            .split("sig=")
            .nth(1)
            .and_then(|rest| rest.split('&').next())
            .unwrap();
        assert!(!sig.contains('+'));
        assert!(!sig.contains('/'));
        assert!(!sig.contains('='));
    }

    #[test]
    fn test_invalid_key_fails() {
        let err = sign_sas_token("hub.example.net", "not base64!!", None, 1).unwrap_err();
        assert!(matches!(err, CredcheckError::InvalidKey(_)));
    }

    #[test]
    fn test_generate_uses_future_expiry() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let token = generate_sas_token("hub", KEY, None, DEFAULT_TOKEN_TTL).unwrap();
        assert!(token.expires_at() >= now + 3600);
        assert!(token.expires_at() <= now + 3601);
    }

    #[test]
    fn test_generate_rejects_overflowing_ttl() {
        let err = generate_sas_token("hub", KEY, None, Duration::from_secs(u64::MAX)).unwrap_err();
        assert!(matches!(err, CredcheckError::Configuration(ref m) if m == "token expiry overflows"));
    }
}
