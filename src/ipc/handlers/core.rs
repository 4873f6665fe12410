use crate::config::{parse_fallback, BackendKind};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::roster::RecordStore;
use crate::store::open_backend;
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "backend": state.store.as_ref().map(|s| s.backend_name())
        }),
    )
}

fn parse_kind(raw: &str) -> Result<BackendKind, HandlerErr> {
    raw.parse::<BackendKind>()
        .map_err(|e| HandlerErr::bad_params(e.to_string()))
}

fn handle_store_open(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let mut cfg = state.config.backend.clone();
    cfg.kind = parse_kind(&get_required_str(&req.params, "backend")?)?;
    if let Some(path) = get_optional_str(&req.params, "path") {
        cfg.data_dir = PathBuf::from(path);
    }
    if let Some(fallback) = get_optional_str(&req.params, "fallback") {
        cfg.fallback = parse_fallback(&fallback).map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    }
    if let Some(id) = get_optional_str(&req.params, "sheetsId") {
        cfg.sheets_id = Some(id);
    }
    if let Some(token) = get_optional_str(&req.params, "sheetsToken") {
        cfg.sheets_token = Some(token);
    }
    if let Some(url) = get_optional_str(&req.params, "scriptUrl") {
        cfg.script_url = Some(url);
    }

    let backend = open_backend(&cfg).map_err(|e| {
        warn!(backend = cfg.kind.as_str(), error = %format!("{e:#}"), "store.open failed");
        HandlerErr {
            code: "store_open_failed",
            message: format!("{e:#}"),
            details: Some(json!({ "backend": cfg.kind.as_str() })),
        }
    })?;
    let store = RecordStore::new(backend);
    let name = store.backend_name();
    state.store = Some(store);
    state.config.backend = cfg;
    state.auth.clear_sessions();
    info!(backend = name, "store switched");
    Ok(json!({ "backend": name }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "store.open" => Some(match handle_store_open(state, req) {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
