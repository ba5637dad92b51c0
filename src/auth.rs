//! Credential handling: Argon2id password hashes and HMAC-SHA256 signed,
//! time-limited session tokens. The token is `hex(claims-json).hex(mac)`;
//! verification recomputes the mac over the payload half and checks expiry.

use anyhow::{anyhow, Result};
use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow!("password hashing failed: {e}"))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: String,
    pub user_name: String,
    pub is_admin: bool,
    /// Unix seconds after which the token is rejected.
    pub exp: i64,
}

pub struct TokenService {
    secret: Vec<u8>,
    ttl_secs: i64,
}

impl TokenService {
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl_secs,
        }
    }

    pub fn issue(&self, user_id: &str, user_name: &str, is_admin: bool) -> Result<String> {
        let claims = TokenClaims {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            is_admin,
            exp: Utc::now().timestamp() + self.ttl_secs,
        };
        let payload = hex::encode(serde_json::to_vec(&claims)?);
        let sig = self.sign(&payload);
        Ok(format!("{payload}.{sig}"))
    }

    /// Returns the claims for a well-formed, correctly signed, unexpired
    /// token; `None` for anything else.
    pub fn verify(&self, token: &str) -> Option<TokenClaims> {
        let (payload, sig) = token.split_once('.')?;
        let sig_bytes = hex::decode(sig).ok()?;
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig_bytes).ok()?;
        let claims: TokenClaims = serde_json::from_slice(&hex::decode(payload).ok()?).ok()?;
        if claims.exp <= Utc::now().timestamp() {
            return None;
        }
        Some(claims)
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}
