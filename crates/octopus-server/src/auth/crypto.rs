//! Credential hashing and PKCE verification.
//!
//! - PBKDF2-SHA256 for confidential client secrets (16-byte salt, 100k
//!   iterations, constant-time compare).
//! - SHA-256 for authorization codes: only the hash is stored.
//! - Cryptographically random url-safe codes (256 bits).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::domain::CodeChallengeMethod;

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// Hash a client secret for storage. Format: `pbkdf2$<iterations>$<salt_hex>$<hash_hex>`.
pub fn hash_client_secret(secret: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut hash = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut hash);

    format!(
        "pbkdf2${PBKDF2_ITERATIONS}${}${}",
        hex::encode(salt),
        hex::encode(hash)
    )
}

/// Verify a presented secret against a stored hash string.
pub fn verify_client_secret(secret: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some("pbkdf2"), Some(iterations), Some(salt_hex), Some(hash_hex)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(hash_hex)) else {
        return false;
    };

    let mut hash = vec![0u8; expected.len()];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), &salt, iterations, &mut hash);
    constant_time_eq(&hash, &expected)
}

/// Generate a url-safe random credential: authorization codes, client ids
/// and plaintext client secrets. 32 random bytes = 256 bits.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 digest, hex-encoded, for single-use code storage and lookup.
pub fn hash_token(token: &str) -> String {
    hash_bytes(token.as_bytes())
}

/// SHA-256 digest of raw bytes, hex-encoded. Also the checksum format the
/// file registry records.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// RFC 7636 verifier check.
pub fn verify_pkce(
    method: CodeChallengeMethod,
    challenge: &str,
    verifier: &str,
) -> bool {
    match method {
        CodeChallengeMethod::S256 => {
            let computed = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
            constant_time_eq(computed.as_bytes(), challenge.as_bytes())
        }
        CodeChallengeMethod::Plain => constant_time_eq(verifier.as_bytes(), challenge.as_bytes()),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_secret_round_trip() {
        let stored = hash_client_secret("s3cret");
        assert!(stored.starts_with("pbkdf2$100000$"));
        assert!(verify_client_secret("s3cret", &stored));
        assert!(!verify_client_secret("wrong", &stored));
        assert!(!verify_client_secret("s3cret", "garbage"));
    }

    #[test]
    fn tokens_are_distinct_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(a.len() >= 43); // 32 bytes base64url without padding
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn pkce_s256_vector() {
        // Appendix B of RFC 7636.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
        assert!(verify_pkce(CodeChallengeMethod::S256, challenge, verifier));
        assert!(!verify_pkce(CodeChallengeMethod::S256, challenge, "not-the-verifier"));
    }

    #[test]
    fn pkce_plain_compares_literally() {
        assert!(verify_pkce(CodeChallengeMethod::Plain, "abc", "abc"));
        assert!(!verify_pkce(CodeChallengeMethod::Plain, "abc", "abd"));
    }
}
