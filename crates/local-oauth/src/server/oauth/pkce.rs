//! PKCE (Proof Key for Code Exchange) verification.
//!
//! Only the S256 method is supported (RFC 7636 §4.2).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// The only accepted `code_challenge_method`.
pub const METHOD_S256: &str = "S256";

/// Compute `BASE64URL(SHA256(code_verifier))`.
#[must_use]
pub fn challenge_s256(code_verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

/// Verify a code verifier against a stored S256 challenge.
///
/// Verifiers outside the RFC 7636 grammar never match.
#[must_use]
pub fn verify_s256(code_verifier: &str, code_challenge: &str) -> bool {
    is_valid_verifier(code_verifier)
        && bool::from(challenge_s256(code_verifier).as_bytes().ct_eq(code_challenge.as_bytes()))
}

/// `code-verifier = 43*128unreserved`
#[must_use]
pub fn is_valid_verifier(code_verifier: &str) -> bool {
    (43..=128).contains(&code_verifier.len())
        && code_verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B test vector
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_s256_valid() {
        assert_eq!(challenge_s256(VERIFIER), CHALLENGE);
        assert!(verify_s256(VERIFIER, CHALLENGE));
    }

    #[test]
    fn test_s256_invalid_verifier() {
        let other = "x".repeat(43);
        assert!(!verify_s256(&other, CHALLENGE));
    }

    #[test]
    fn test_s256_invalid_challenge() {
        assert!(!verify_s256(VERIFIER, "wrong-challenge"));
        // Same length, last character differs
        assert!(!verify_s256(VERIFIER, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cN"));
    }

    #[test]
    fn test_short_verifier_rejected_even_if_hash_matches() {
        let short = "too-short";
        assert!(!verify_s256(short, &challenge_s256(short)));
    }

    #[test]
    fn test_verifier_grammar() {
        assert!(is_valid_verifier(VERIFIER));
        assert!(is_valid_verifier(&"a".repeat(128)));
        assert!(!is_valid_verifier(&"a".repeat(129)));
        assert!(!is_valid_verifier(&format!("{}/", "a".repeat(43))));
    }
}
