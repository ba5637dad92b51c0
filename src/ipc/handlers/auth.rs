use rusqlite::OptionalExtension;
use serde_json::json;

use crate::auth;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};

struct UserRow {
    id: String,
    username: String,
    password_hash: String,
    full_name: String,
    is_admin: bool,
}

fn find_user_by_username(
    state: &AppState,
    username: &str,
) -> Result<Option<UserRow>, HandlerErr> {
    state
        .db
        .query_row(
            "SELECT id, username, password_hash, full_name, is_admin
             FROM users WHERE username = ?",
            [username],
            |r| {
                Ok(UserRow {
                    id: r.get(0)?,
                    username: r.get(1)?,
                    password_hash: r.get(2)?,
                    full_name: r.get(3)?,
                    is_admin: r.get::<_, i64>(4)? != 0,
                })
            },
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn login(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let username = get_required_str(&req.params, "username")?;
    let password = get_required_str(&req.params, "password")?;

    let Some(user) = find_user_by_username(state, &username)? else {
        return Err(HandlerErr::not_found("user not found"));
    };
    if !auth::verify_password(&password, &user.password_hash) {
        return Err(HandlerErr::unauthenticated("invalid password"));
    }

    let token = state
        .tokens
        .issue(&user.id, &user.username, user.is_admin)
        .map_err(|e| HandlerErr::db("token_issue_failed", e))?;

    Ok(json!({
        "token": token,
        "user": {
            "id": user.id,
            "username": user.username,
            "name": user.full_name,
            "isAdmin": user.is_admin,
        }
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(match login(state, req) {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
