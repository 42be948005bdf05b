use chrono::Utc;
use jsonwebtoken::{self, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Role;

/// Lifetime of every issued token. There is no refresh and no server-side revocation.
pub const TOKEN_TTL_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Username of the authenticated identity.
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl JwtClaims {
    pub fn new(username: &str, role: Role, issued_at: i64) -> Self {
        Self {
            sub: username.to_string(),
            role,
            iat: issued_at,
            exp: issued_at + TOKEN_TTL_SECS,
        }
    }

    pub fn issue_now(username: &str, role: Role) -> Self {
        Self::new(username, role, Utc::now().timestamp())
    }
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid token: {0}")]
    Decode(String),
    #[error("encoding failed: {0}")]
    Encode(String),
}

/// Verifies signature and expiry. No leeway: a token is dead the second `exp` passes.
pub fn decode_and_verify(token: &str, secret: &[u8]) -> Result<JwtClaims, JwtError> {
    let key = DecodingKey::from_secret(secret);
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.validate_exp = true;
    jsonwebtoken::decode::<JwtClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| JwtError::Decode(e.to_string()))
}

pub fn encode(claims: &JwtClaims, secret: &[u8]) -> Result<String, JwtError> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| JwtError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"unit-test-secret";

    fn minutes_ago(m: i64) -> i64 {
        Utc::now().timestamp() - m * 60
    }

    #[test]
    fn expiry_is_one_hour_after_issue() {
        let claims = JwtClaims::new("alice99", Role::Parent, 1_000);
        assert_eq!(claims.exp, 1_000 + 3600);
    }

    #[test]
    fn token_is_accepted_fifty_nine_minutes_after_issue() {
        let claims = JwtClaims::new("teacher1", Role::Teacher, minutes_ago(59));
        let token = encode(&claims, SECRET).unwrap();
        let decoded = decode_and_verify(&token, SECRET).unwrap();
        assert_eq!(decoded, claims);
    }

    #[test]
    fn token_is_rejected_sixty_one_minutes_after_issue() {
        let claims = JwtClaims::new("teacher1", Role::Teacher, minutes_ago(61));
        let token = encode(&claims, SECRET).unwrap();
        assert!(matches!(
            decode_and_verify(&token, SECRET),
            Err(JwtError::Decode(_))
        ));
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let token = encode(&JwtClaims::issue_now("admin", Role::Admin), b"other").unwrap();
        assert!(decode_and_verify(&token, SECRET).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_and_verify("not.a.jwt", SECRET).is_err());
    }
}
