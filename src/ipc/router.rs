use super::error::err;
use super::handlers;
use super::types::{AppState, AuthContext, Request};

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    // Public methods: no credential required.
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::auth::try_handle(state, &req) {
        return resp;
    }

    // Everything else sits behind the token gate.
    let Some(token) = req.token.as_deref() else {
        return err(&req.id, "unauthenticated", "missing token", None);
    };
    let Some(claims) = state.tokens.verify(token) else {
        return err(&req.id, "unauthenticated", "invalid or expired token", None);
    };
    let auth = AuthContext::from(claims);

    if let Some(resp) = handlers::users::try_handle(state, &auth, &req) {
        return resp;
    }
    if let Some(resp) = handlers::schools::try_handle(state, &auth, &req) {
        return resp;
    }
    if let Some(resp) = handlers::vehicles::try_handle(state, &auth, &req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, &auth, &req) {
        return resp;
    }
    if let Some(resp) = handlers::import::try_handle(state, &auth, &req) {
        return resp;
    }
    if let Some(resp) = handlers::payments::try_handle(state, &auth, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
