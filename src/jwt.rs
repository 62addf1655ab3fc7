//! HS256 session tokens.
//!
//! ```rust
//! use plinth::jwt;
//!
//! let token = jwt::create_token(42, "admin", "secret").unwrap();
//! let claims = jwt::parse_token(&token, "secret").unwrap();
//! assert_eq!((claims.user_id, claims.role.as_str()), (42, "admin"));
//! ```

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// Lifetime of tokens minted by [`create_token`].
pub const TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    pub role: String,
    /// Expiry, seconds since the epoch.
    pub exp: u64,
    pub iat: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("token is expired")]
    Expired,

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token is malformed: {0}")]
    Malformed(String),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            _ => Self::Malformed(e.to_string()),
        }
    }
}

pub fn create_token(user_id: u64, role: &str, secret: &str) -> Result<String, JwtError> {
    create_token_with_ttl(user_id, role, secret, TOKEN_TTL)
}

pub fn create_token_with_ttl(user_id: u64, role: &str, secret: &str, ttl: Duration) -> Result<String, JwtError> {
    let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
    let claims = Claims { user_id, role: role.to_owned(), exp: now + ttl.as_secs(), iat: now };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| JwtError::Signing(e.to_string()))
}

/// Verifies signature and expiry. Only HS256 is accepted.
pub fn parse_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "supersecretjwtkey";

    #[test]
    fn round_trip_keeps_claims() {
        let token = create_token(123, "user", SECRET).unwrap();
        let claims = parse_token(&token, SECRET).unwrap();

        assert_eq!(claims.user_id, 123);
        assert_eq!(claims.role, "user");
        assert_eq!(claims.exp - claims.iat, TOKEN_TTL.as_secs());
        assert!(claims.exp > u64::try_from(Utc::now().timestamp()).unwrap());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = create_token(456, "admin", SECRET).unwrap();
        let err = parse_token(&token, "wrongsecret").unwrap_err();
        assert!(matches!(err, JwtError::InvalidSignature));
        assert!(err.to_string().contains("signature is invalid"));
    }

    #[test]
    fn expired_token_is_rejected() {
        let an_hour_ago = u64::try_from(Utc::now().timestamp()).unwrap() - 3600;
        let claims = Claims { user_id: 1, role: "user".into(), exp: an_hour_ago, iat: an_hour_ago - 60 };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();

        assert!(matches!(parse_token(&token, SECRET), Err(JwtError::Expired)));
    }

    #[test]
    fn malformed_token_is_rejected() {
        assert!(matches!(parse_token("not.a.jwt", SECRET), Err(JwtError::Malformed(_))));
        assert!(matches!(parse_token("", SECRET), Err(JwtError::Malformed(_))));
    }
}
