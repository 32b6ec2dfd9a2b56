use base64::prelude::*;
use credcheck::sas::{generate_sas_token, sign_sas_token, DEFAULT_TOKEN_TTL};
use credcheck::CredcheckError;
use ring::hmac;

const URI: &str = "my-hub.azure-devices.net";
const KEY: &str = "dGVzdC1zaGFyZWQtYWNjZXNzLWtleS0xMjM0NTY3ODkw";

#[test]
fn token_is_deterministic_for_fixed_inputs() {
    let a = sign_sas_token(URI, KEY, Some("iothubowner"), 1_800_000_000).unwrap();
    let b = sign_sas_token(URI, KEY, Some("iothubowner"), 1_800_000_000).unwrap();
    assert_eq!(a, b);

    let c = sign_sas_token(URI, KEY, Some("iothubowner"), 1_800_000_001).unwrap();
    assert_ne!(a.as_str(), c.as_str());
}

#[test]
fn signature_matches_hmac_of_uri_and_expiry() {
    let token = sign_sas_token(URI, KEY, None, 1_800_000_000).unwrap();

    let key = hmac::Key::new(hmac::HMAC_SHA256, &BASE64_STANDARD.decode(KEY).unwrap());
    let tag = hmac::sign(&key, format!("{URI}\n1800000000").as_bytes());
    let expected: String =
        url::form_urlencoded::byte_serialize(BASE64_STANDARD.encode(tag.as_ref()).as_bytes())
            .collect();

    assert_eq!(
        token.as_str(),
        format!("SharedAccessSignature sr={URI}&sig={expected}&se=1800000000")
    );
}

#[test]
fn expiry_tracks_requested_validity() {
    let short = generate_sas_token(URI, KEY, None, std::time::Duration::from_secs(60)).unwrap();
    let long = generate_sas_token(URI, KEY, None, DEFAULT_TOKEN_TTL).unwrap();
    let delta = long.expires_at() - short.expires_at();
    assert!((3539..=3541).contains(&delta), "delta was {delta}");
    assert!(long.as_str().contains(&format!("&se={}", long.expires_at())));
}

#[test]
fn invalid_key_is_rejected() {
    for key in ["%%%", "abc", "not-base64!"] {
        let err = sign_sas_token(URI, key, None, 1).unwrap_err();
        assert!(matches!(err, CredcheckError::InvalidKey(_)), "{key}: {err}");
    }
}
