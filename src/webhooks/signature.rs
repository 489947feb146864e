//! Webhook signature verification using HMAC-SHA256.
//!
//! The remote service signs each notification with a shared secret configured
//! per project. The signature travels in the `X-Signature` header as the
//! base64 encoding of `HMAC-SHA256(secret, payload)`.
//!
//! Several projects may be configured, so verification succeeds if the digest
//! matches under any candidate secret. Verification runs before an event is
//! handed to the router; invalid signatures are rejected with
//! [`IngressError::AuthenticationFailed`].

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::error::{IngressError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Parses a signature header value into raw digest bytes.
///
/// Surrounding whitespace is ignored. Returns `None` for empty or non-base64
/// values. Never panics.
///
/// # Examples
///
/// ```
/// use execution_relay::webhooks::parse_signature;
///
/// assert_eq!(parse_signature("AAEC"), Some(vec![0, 1, 2]));
/// assert!(parse_signature("").is_none());
/// assert!(parse_signature("not base64!").is_none());
/// ```
pub fn parse_signature(header: &str) -> Option<Vec<u8>> {
    let trimmed = header.trim();
    if trimmed.is_empty() {
        return None;
    }
    STANDARD.decode(trimmed).ok()
}

/// Computes the HMAC-SHA256 signature of a payload using the given secret.
///
/// This is useful for testing purposes (generating expected signatures).
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a signature as an `X-Signature` header value (base64).
pub fn format_signature(signature: &[u8]) -> String {
    STANDARD.encode(signature)
}

/// Verifies a signature header against the payload and one secret.
///
/// Returns `true` if the signature is valid, `false` otherwise.
/// Uses constant-time comparison to prevent timing attacks.
///
/// # Examples
///
/// ```
/// use execution_relay::webhooks::{verify_signature, compute_signature, format_signature};
///
/// let payload = br#"{"kind":"step-ended"}"#;
/// let header = format_signature(&compute_signature(payload, b"secret"));
///
/// assert!(verify_signature(payload, &header, b"secret"));
/// assert!(!verify_signature(payload, &header, b"other"));
/// ```
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let expected_signature = match parse_signature(signature_header) {
        Some(sig) => sig,
        None => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);

    // Constant-time comparison via the HMAC library
    mac.verify_slice(&expected_signature).is_ok()
}

/// Verifies a payload against a set of candidate secrets.
///
/// Succeeds if the signature matches under any candidate. A missing header or
/// an empty candidate set is always a failure.
///
/// # Errors
///
/// Returns [`IngressError::AuthenticationFailed`] when no candidate verifies.
pub fn verify_any<I, S>(payload: &[u8], signature_header: Option<&str>, candidates: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let header = signature_header.ok_or(IngressError::AuthenticationFailed("missing signature"))?;

    let mut tried = 0usize;
    for secret in candidates {
        tried += 1;
        if verify_signature(payload, header, secret.as_ref()) {
            return Ok(());
        }
    }

    if tried == 0 {
        Err(IngressError::AuthenticationFailed("no candidate secrets"))
    } else {
        Err(IngressError::AuthenticationFailed("signature mismatch"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ========================================================================
    // Unit tests for known vectors and edge cases
    // ========================================================================

    #[test]
    fn test_parse_signature_valid() {
        assert_eq!(parse_signature("EjSrzQ=="), Some(vec![0x12, 0x34, 0xab, 0xcd]));
    }

    #[test]
    fn test_parse_signature_trims_whitespace() {
        assert_eq!(parse_signature("  EjSrzQ==\n"), Some(vec![0x12, 0x34, 0xab, 0xcd]));
    }

    #[test]
    fn test_parse_signature_empty() {
        assert_eq!(parse_signature(""), None);
        assert_eq!(parse_signature("   "), None);
    }

    #[test]
    fn test_parse_signature_invalid_base64() {
        assert_eq!(parse_signature("%%%"), None);
    }

    /// RFC 4231 test case 2 ("Jefe" / "what do ya want for nothing?").
    #[test]
    fn test_rfc4231_vector() {
        let sig = compute_signature(b"what do ya want for nothing?", b"Jefe");
        assert_eq!(
            format_signature(&sig),
            "W9zBRr9gdU5qBCQmCJV1x1oAPwidJzmDnexYuWTsOEM="
        );
    }

    #[test]
    fn test_verify_signature_wrong_secret() {
        let payload = b"test payload";
        let header = format_signature(&compute_signature(payload, b"correct-secret"));

        assert!(verify_signature(payload, &header, b"correct-secret"));
        assert!(!verify_signature(payload, &header, b"wrong-secret"));
    }

    #[test]
    fn test_verify_signature_malformed_header_returns_false() {
        let payload = b"test";
        let secret = b"secret";

        assert!(!verify_signature(payload, "", secret));
        assert!(!verify_signature(payload, "sha256=abc", secret));
        assert!(!verify_signature(payload, "!!!", secret));
    }

    #[test]
    fn test_verify_any_matches_second_candidate() {
        let payload = b"payload";
        let header = format_signature(&compute_signature(payload, b"two"));

        let candidates: [&[u8]; 3] = [b"one", b"two", b"three"];
        assert!(verify_any(payload, Some(header.as_str()), candidates).is_ok());
    }

    #[test]
    fn test_verify_any_missing_header_fails() {
        let candidates: [&[u8]; 1] = [b"one"];
        let result = verify_any(b"payload", None, candidates);
        assert!(matches!(
            result,
            Err(IngressError::AuthenticationFailed("missing signature"))
        ));
    }

    #[test]
    fn test_verify_any_empty_candidates_fails() {
        let payload = b"payload";
        let header = format_signature(&compute_signature(payload, b""));
        let candidates: Vec<Vec<u8>> = Vec::new();

        let result = verify_any(payload, Some(header.as_str()), candidates);
        assert!(matches!(
            result,
            Err(IngressError::AuthenticationFailed("no candidate secrets"))
        ));
    }

    #[test]
    fn test_verify_any_no_match_fails() {
        let payload = b"payload";
        let header = format_signature(&compute_signature(payload, b"elsewhere"));
        let candidates: [&[u8]; 2] = [b"one", b"two"];

        assert!(matches!(
            verify_any(payload, Some(header.as_str()), candidates),
            Err(IngressError::AuthenticationFailed("signature mismatch"))
        ));
    }

    // ========================================================================
    // Property-based tests
    // ========================================================================

    proptest! {
        /// Signing with S verifies against any candidate set containing S.
        #[test]
        fn prop_sign_verify_any_roundtrip(
            payload: Vec<u8>,
            secret: Vec<u8>,
            others in prop::collection::vec(any::<Vec<u8>>(), 0..4),
            position in 0usize..5
        ) {
            let header = format_signature(&compute_signature(&payload, &secret));
            let mut candidates = others.clone();
            let at = position.min(candidates.len());
            candidates.insert(at, secret.clone());
            prop_assert!(verify_any(&payload, Some(header.as_str()), &candidates).is_ok());
        }

        /// Changing one byte of the payload makes verification fail.
        #[test]
        fn prop_single_byte_change_fails(
            payload in prop::collection::vec(any::<u8>(), 1..256),
            secret: Vec<u8>,
            index: prop::sample::Index,
            flip in 1u8..=255
        ) {
            let header = format_signature(&compute_signature(&payload, &secret));
            let mut tampered = payload.clone();
            let i = index.index(tampered.len());
            tampered[i] ^= flip;
            prop_assert!(verify_any(&tampered, Some(header.as_str()), [&secret]).is_err());
        }

        /// Signing with one secret and verifying with a different one fails.
        #[test]
        fn prop_wrong_secret_fails(payload: Vec<u8>, secret1: Vec<u8>, secret2: Vec<u8>) {
            prop_assume!(secret1 != secret2);

            let header = format_signature(&compute_signature(&payload, &secret1));
            prop_assert!(!verify_signature(&payload, &header, &secret2));
        }

        /// parse(format(signature)) roundtrips.
        #[test]
        fn prop_format_parse_roundtrip(signature: [u8; 32]) {
            let header = format_signature(&signature);
            prop_assert_eq!(parse_signature(&header), Some(signature.to_vec()));
        }

        /// Malformed headers never cause a panic.
        #[test]
        fn prop_malformed_header_no_panic(header: String, payload: Vec<u8>, secret: Vec<u8>) {
            let _ = parse_signature(&header);
            let _ = verify_signature(&payload, &header, &secret);
        }
    }
}
