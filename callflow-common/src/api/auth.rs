//! Shared-secret validation and canonical parameter encoding
//!
//! # Pure Functions
//!
//! - [`validate_shared_secret`]: compares a request header against the configured secret
//! - [`canonical_query`]: the `key=value&...` string (keys sorted) that request
//!   signatures are computed over

use sha2::{Digest, Sha256};

// ========================================
// Error Types
// ========================================

/// Authentication error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiAuthError {
    /// Secret is configured but the request carried none
    MissingSecret,

    /// Secret does not match the configured value
    InvalidSecret,
}

impl std::fmt::Display for ApiAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiAuthError::MissingSecret => write!(f, "Missing shared secret"),
            ApiAuthError::InvalidSecret => write!(f, "Invalid shared secret"),
        }
    }
}

impl std::error::Error for ApiAuthError {}

// ========================================
// Shared Secret Validation
// ========================================

/// Validate a request's shared secret
///
/// Fails closed: when `expected` is configured (non-empty) the request must
/// carry an identical value. When no secret is configured, every request passes.
///
/// Both values are hashed before comparison so the comparison time does not
/// depend on where the first differing byte sits.
///
/// # Examples
///
/// ```
/// use callflow_common::api::auth::{validate_shared_secret, ApiAuthError};
///
/// assert!(validate_shared_secret(None, None).is_ok());
/// assert!(validate_shared_secret(Some("k"), Some("k")).is_ok());
/// assert_eq!(validate_shared_secret(Some("k"), None), Err(ApiAuthError::MissingSecret));
/// assert_eq!(validate_shared_secret(Some("k"), Some("x")), Err(ApiAuthError::InvalidSecret));
/// ```
pub fn validate_shared_secret(
    expected: Option<&str>,
    provided: Option<&str>,
) -> Result<(), ApiAuthError> {
    let expected = match expected {
        Some(secret) if !secret.is_empty() => secret,
        _ => return Ok(()),
    };

    let provided = match provided {
        Some(value) if !value.is_empty() => value,
        _ => return Err(ApiAuthError::MissingSecret),
    };

    let expected_digest = Sha256::digest(expected.as_bytes());
    let provided_digest = Sha256::digest(provided.as_bytes());

    let diff = expected_digest
        .iter()
        .zip(provided_digest.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));

    if diff == 0 {
        Ok(())
    } else {
        Err(ApiAuthError::InvalidSecret)
    }
}

// ========================================
// Canonical Parameter Encoding
// ========================================

/// Build the canonical `key=value&key=value` string with keys sorted
///
/// Values are percent-encoded the way HTML forms are (space → `+`), so the
/// string can be used verbatim as a query string.
///
/// # Examples
///
/// ```
/// use callflow_common::api::auth::canonical_query;
///
/// let query = canonical_query(&[("call_id", "1700000000.42"), ("appid", "app 1")]);
/// assert_eq!(query, "appid=app+1&call_id=1700000000.42");
/// ```
pub fn canonical_query(params: &[(&str, &str)]) -> String {
    let mut pairs: Vec<_> = params.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.cmp(b.1)));
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", form_encode(k), form_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn form_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

// ========================================
// Tests
// ========================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_secret_configured_accepts_everything() {
        assert!(validate_shared_secret(None, Some("anything")).is_ok());
        assert!(validate_shared_secret(Some(""), None).is_ok());
    }

    #[test]
    fn test_missing_header_rejected() {
        assert_eq!(
            validate_shared_secret(Some("secret"), Some("")),
            Err(ApiAuthError::MissingSecret)
        );
    }

    #[test]
    fn test_mismatch_rejected() {
        assert_eq!(
            validate_shared_secret(Some("secret"), Some("secret2")),
            Err(ApiAuthError::InvalidSecret)
        );
    }

    #[test]
    fn test_canonical_query_sorting() {
        let query = canonical_query(&[("z", "3"), ("a", "1"), ("m", "2")]);
        assert_eq!(query, "a=1&m=2&z=3");
    }

    #[test]
    fn test_canonical_query_encoding() {
        let query = canonical_query(&[("path", "/v1/x?y"), ("name", "Мария")]);
        assert_eq!(query, "name=%D0%9C%D0%B0%D1%80%D0%B8%D1%8F&path=%2Fv1%2Fx%3Fy");
    }

    #[test]
    fn test_canonical_query_empty() {
        assert_eq!(canonical_query(&[]), "");
    }
}
