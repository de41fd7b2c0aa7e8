//! HS256 access tokens.
//!
//! Hand-assembled JWS: header and claims are serde-serialized, signed with
//! HMAC-SHA256 over the base64url signing input. Verification checks the
//! signature in constant time before trusting any claim.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

const JWT_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("issuer or audience mismatch")]
    WrongParty,
}

/// Claims carried by an Octopus access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// User subject, not the row id.
    pub sub: String,
    /// Tenant: the workspace the token was issued for.
    pub tid: Uuid,
    pub client_id: String,
    /// Space-separated granted scopes.
    pub scp: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

pub struct TokenSigner {
    secret: Vec<u8>,
    issuer: Option<String>,
    audience: Option<String>,
}

impl TokenSigner {
    pub fn new(secret: &[u8], issuer: Option<String>, audience: Option<String>) -> Self {
        Self {
            secret: secret.to_vec(),
            issuer,
            audience,
        }
    }

    pub fn issue(
        &self,
        subject: &str,
        workspace_id: Uuid,
        client_id: &str,
        scopes: &str,
        ttl_secs: i64,
        now: DateTime<Utc>,
    ) -> String {
        let claims = AccessTokenClaims {
            sub: subject.to_string(),
            tid: workspace_id,
            client_id: client_id.to_string(),
            scp: scopes.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ttl_secs)).timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &AccessTokenClaims) -> String {
        let header = URL_SAFE_NO_PAD.encode(JWT_HEADER.as_bytes());
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(claims).expect("claims serialize"),
        );
        let signing_input = format!("{header}.{payload}");
        let signature = URL_SAFE_NO_PAD.encode(hmac_sha256(&self.secret, signing_input.as_bytes()));
        format!("{signing_input}.{signature}")
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AccessTokenClaims, TokenError> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        let signing_input = format!("{header}.{payload}");
        let expected = hmac_sha256(&self.secret, signing_input.as_bytes());
        let presented = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;
        if !constant_time_eq(&expected, &presented) {
            return Err(TokenError::BadSignature);
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let claims: AccessTokenClaims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;

        if claims.exp < now.timestamp() {
            return Err(TokenError::Expired);
        }
        if let Some(issuer) = &self.issuer {
            if claims.iss.as_deref() != Some(issuer) {
                return Err(TokenError::WrongParty);
            }
        }
        if let Some(audience) = &self.audience {
            if claims.aud.as_deref() != Some(audience) {
                return Err(TokenError::WrongParty);
            }
        }

        Ok(claims)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(b"0123456789abcdef0123456789abcdef", None, None)
    }

    #[test]
    fn sign_verify_round_trip() {
        let now = Utc::now();
        let ws = Uuid::new_v4();
        let token = signer().issue("user-1", ws, "client-1", "read write", 3600, now);

        let claims = signer().verify(&token, now).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.tid, ws);
        assert_eq!(claims.scp, "read write");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn expired_token_is_refused() {
        let now = Utc::now();
        let token = signer().issue("u", Uuid::new_v4(), "c", "read", 60, now);
        let later = now + Duration::seconds(120);
        assert_eq!(signer().verify(&token, later), Err(TokenError::Expired));
    }

    #[test]
    fn tampered_token_is_refused() {
        let now = Utc::now();
        let token = signer().issue("u", Uuid::new_v4(), "c", "read", 60, now);
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(matches!(
            signer().verify(&tampered, now),
            Err(TokenError::BadSignature) | Err(TokenError::Malformed)
        ));

        let other = TokenSigner::new(b"another-secret-another-secret-32", None, None);
        assert_eq!(other.verify(&token, now), Err(TokenError::BadSignature));
    }

    #[test]
    fn issuer_and_audience_are_enforced() {
        let now = Utc::now();
        let issuing = TokenSigner::new(
            b"0123456789abcdef0123456789abcdef",
            Some("https://id.example".into()),
            Some("octopus".into()),
        );
        let token = issuing.issue("u", Uuid::new_v4(), "c", "read", 60, now);
        assert!(issuing.verify(&token, now).is_ok());

        let strict_other = TokenSigner::new(
            b"0123456789abcdef0123456789abcdef",
            Some("https://other.example".into()),
            Some("octopus".into()),
        );
        assert_eq!(strict_other.verify(&token, now), Err(TokenError::WrongParty));
    }
}
