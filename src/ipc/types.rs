use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::auth::{TokenClaims, TokenService};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Bearer credential; required for every method except `health`
    /// and `auth.login`.
    #[serde(default)]
    pub token: Option<String>,
}

pub struct AppState {
    pub data_dir: PathBuf,
    pub db: Connection,
    pub tokens: TokenService,
}

/// The already-verified caller identity handed to protected handlers.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub user_name: String,
    pub is_admin: bool,
}

impl From<TokenClaims> for AuthContext {
    fn from(claims: TokenClaims) -> Self {
        AuthContext {
            user_id: claims.user_id,
            user_name: claims.user_name,
            is_admin: claims.is_admin,
        }
    }
}
