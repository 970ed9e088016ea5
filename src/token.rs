//! Mints short-TTL SLURM JWTs per user.

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::error::ProxyError;

const GENERIC_USERNAME: &str = "generic";

#[derive(Debug, Serialize, Deserialize)]
pub struct SlurmClaims {
    pub sun: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct TokenMinter {
    key: EncodingKey,
    ttl_seconds: i64,
}

impl TokenMinter {
    /// Decode the base64 secret once at construction. Fails fast
    /// (`ProxyError::Auth`) if the secret is absent or not valid base64 —
    /// the minter does not authenticate the caller, it trusts that the
    /// Submitter/RestClient layer already validated the upstream request.
    pub fn new(secret_base64: &str, ttl_seconds: i64) -> Result<Self, ProxyError> {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(secret_base64)
            .map_err(|e| ProxyError::Auth(format!("invalid base64 HS256 secret: {e}")))?;
        Ok(TokenMinter {
            key: EncodingKey::from_secret(&decoded),
            ttl_seconds,
        })
    }

    /// `mint(username) -> compact_jws`. Empty/missing usernames are coerced
    /// to the sentinel `"generic"`. A fresh token is minted per call; tokens
    /// are never cached (TTL is much smaller than a typical request).
    pub fn mint(&self, username: &str) -> Result<String, ProxyError> {
        self.mint_at(username, Utc::now().timestamp())
    }

    /// Same as [`Self::mint`] but with an explicit `iat`, so callers (and
    /// tests) can pin the clock.
    pub fn mint_at(&self, username: &str, now: i64) -> Result<String, ProxyError> {
        let sun = if username.trim().is_empty() {
            GENERIC_USERNAME.to_string()
        } else {
            username.to_string()
        };
        let claims = SlurmClaims {
            sun,
            iat: now,
            exp: now + self.ttl_seconds,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.key)
            .map_err(|e| ProxyError::Auth(format!("failed to mint token: {e}")))
    }
}
