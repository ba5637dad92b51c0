use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_opt_str, get_required_str, is_constraint_violation, HandlerErr,
};
use crate::ipc::types::{AppState, AuthContext, Request};

fn create(state: &AppState, auth: &AuthContext, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    if !auth.is_admin {
        return Err(HandlerErr::forbidden("administrator role required"));
    }

    let username = get_required_str(&req.params, "username")?;
    let password = get_required_str(&req.params, "password")?;
    let full_name = get_required_str(&req.params, "name")?;
    let phone = get_opt_str(&req.params, "phone");
    let email = get_opt_str(&req.params, "email");
    let is_admin = req
        .params
        .get("isAdmin")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let user_id = Uuid::new_v4().to_string();
    let now = db::now_ts();
    let password_hash = crate::auth::hash_password(&password)
        .map_err(|e| HandlerErr::db("password_hash_failed", e))?;

    state
        .db
        .execute(
            "INSERT INTO users(id, username, password_hash, full_name, phone, email, is_admin, created_at, modified_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &user_id,
                &username,
                &password_hash,
                &full_name,
                &phone,
                &email,
                is_admin as i64,
                &now,
                &now,
            ),
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                HandlerErr::conflict("username already taken")
            } else {
                HandlerErr::db("db_insert_failed", e)
            }
        })?;

    // The hash never leaves the store.
    Ok(json!({
        "user": {
            "id": user_id,
            "username": username,
            "name": full_name,
            "phone": phone,
            "email": email,
            "isAdmin": is_admin,
            "createdAt": now,
            "modifiedAt": now,
        }
    }))
}

pub fn try_handle(
    state: &mut AppState,
    auth: &AuthContext,
    req: &Request,
) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(match create(state, auth, req) {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
