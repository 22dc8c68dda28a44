use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Admin bearer token claims. Integrity only, not confidential: the single
/// `is_admin` claim plus the standard expiry.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AdminClaims {
    pub is_admin: bool,
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

const ADMIN_TOKEN_TTL_HOURS: i64 = 2;

/// Issue a signed admin token. Returns the token and its unix expiry.
pub fn create_admin_token(secret: &str) -> Result<(String, i64)> {
    let now = Utc::now();
    let expires_at = now + Duration::hours(ADMIN_TOKEN_TTL_HOURS);

    let claims = AdminClaims {
        is_admin: true,
        sub: "admin".to_string(),
        exp: expires_at.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?;

    Ok((token, expires_at.timestamp()))
}

/// Verify an admin token. Pure: no store lookup.
pub fn validate_admin_token(token: &str, secret: &str) -> Result<AdminClaims> {
    let data = decode::<AdminClaims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;

    if !data.claims.is_admin {
        return Err(anyhow!("token does not carry the admin claim"));
    }

    Ok(data.claims)
}
