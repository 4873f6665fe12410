use serde_json::json;

use crate::auth::LoginOutcome;
use crate::error::StoreError;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{get_required_str, require_store, view};
use crate::ipc::types::{AppState, Request};

fn handle_auth_login(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = require_store(state)?;
    let login = get_required_str(&req.params, "login")?;
    // Passwords are not trimmed here; normalization happens in the store.
    let password = req
        .params
        .get("password")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    match state.auth.login(store, &login, password)? {
        LoginOutcome::Authenticated { token, student } => {
            Ok(json!({ "token": token, "student": view(&student) }))
        }
        LoginOutcome::Rejected => Err(StoreError::Unauthorized.into()),
        LoginOutcome::LockedOut { retry_after } => Err(HandlerErr {
            code: "locked_out",
            message: "too many failed attempts, try again later".to_string(),
            details: Some(json!({ "retryAfterMs": retry_after.as_millis() as u64 })),
        }),
    }
}

fn handle_auth_resume(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = require_store(state)?;
    let token = get_required_str(&req.params, "token")?;
    Ok(match state.auth.resume(store, &token)? {
        Some(student) => json!({ "authenticated": true, "student": view(&student) }),
        None => json!({ "authenticated": false }),
    })
}

fn handle_auth_logout(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let token = get_required_str(&req.params, "token")?;
    Ok(json!({ "loggedOut": state.auth.logout(&token) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "auth.login" => handle_auth_login(state, req),
        "auth.resume" => handle_auth_resume(state, req),
        "auth.logout" => handle_auth_logout(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
