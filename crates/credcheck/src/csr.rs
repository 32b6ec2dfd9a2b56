//! Certificate-signing-request input for the `issueCertificate` payload.

use crate::error::{CredcheckError, Result};
use base64::prelude::*;
use std::path::Path;

const PEM_BEGIN: &str = "-----BEGIN";
const PEM_END: &str = "-----END";

/// Checks that `csr` is non-empty standard base64 and returns it trimmed.
///
/// # Errors
///
/// Returns [`CredcheckError::InvalidCsr`] otherwise.
pub fn validate_csr(csr: &str) -> Result<String> {
    let trimmed = csr.trim();
    if trimmed.is_empty() {
        return Err(CredcheckError::InvalidCsr("CSR is empty".to_string()));
    }
    BASE64_STANDARD
        .decode(trimmed)
        .map_err(|e| CredcheckError::InvalidCsr(e.to_string()))?;
    Ok(trimmed.to_string())
}

/// Base64 CSR body from raw file content.
///
/// PEM armor is stripped and the body lines joined; anything else is taken
/// as DER and encoded.
///
/// # Errors
///
/// Returns [`CredcheckError::InvalidCsr`] if a PEM body is empty or not base64.
pub fn csr_from_bytes(content: &[u8]) -> Result<String> {
    match std::str::from_utf8(content) {
        Ok(text) if text.contains(PEM_BEGIN) => {
            let body: String = text
                .lines()
                .map(str::trim)
                .skip_while(|line| !line.starts_with(PEM_BEGIN))
                .skip(1)
                .take_while(|line| !line.starts_with(PEM_END))
                .filter(|line| !line.is_empty() && !line.contains(':'))
                .collect();
            validate_csr(&body)
        }
        _ if content.is_empty() => Err(CredcheckError::InvalidCsr("CSR file is empty".to_string())),
        _ => Ok(BASE64_STANDARD.encode(content)),
    }
}

/// Reads a CSR file (PEM or DER).
///
/// # Errors
///
/// Returns [`CredcheckError::CredentialFile`] if the file cannot be read, or
/// [`CredcheckError::InvalidCsr`] if its content is unusable.
pub fn csr_from_file(path: &Path) -> Result<String> {
    let content = std::fs::read(path).map_err(|source| CredcheckError::CredentialFile {
        what: "CSR",
        path: path.to_path_buf(),
        source,
    })?;
    csr_from_bytes(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::MOCK_CSR;

    #[test]
    fn test_validate_mock_csr() {
        assert_eq!(validate_csr(MOCK_CSR).unwrap(), MOCK_CSR);
        assert_eq!(validate_csr("  TU9DSyBDU1I=\n").unwrap(), MOCK_CSR);
        assert!(validate_csr("").is_err());
        assert!(validate_csr("***").is_err());
    }

    #[test]
    fn test_pem_body_is_joined() {
        let pem = "-----BEGIN CERTIFICATE REQUEST-----\nTU9D\nSyBD\nU1I=\n-----END CERTIFICATE REQUEST-----\n";
        assert_eq!(csr_from_bytes(pem.as_bytes()).unwrap(), MOCK_CSR);
    }

    #[test]
    fn test_der_is_encoded() {
        assert_eq!(csr_from_bytes(b"MOCK CSR").unwrap(), MOCK_CSR);
        assert!(csr_from_bytes(b"").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = csr_from_file(Path::new("/nonexistent/device.csr")).unwrap_err();
        assert!(matches!(err, CredcheckError::CredentialFile { what: "CSR", .. }));
    }
}
