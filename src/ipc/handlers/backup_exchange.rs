use std::path::PathBuf;

use serde_json::{json, Value};

use crate::backup;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{get_required_str, require_store};
use crate::ipc::types::{AppState, Request};

fn io_failed(e: anyhow::Error, path: &str) -> HandlerErr {
    HandlerErr {
        code: "io_failed",
        message: format!("{e:#}"),
        details: Some(json!({ "path": path })),
    }
}

fn handle_export_bundle(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let store = require_store(state)?;
    let out_path = get_required_str(&req.params, "outPath")?;
    let summary =
        backup::export_bundle(store, &PathBuf::from(&out_path)).map_err(|e| io_failed(e, &out_path))?;
    Ok(json!({
        "path": out_path,
        "bundleFormat": summary.bundle_format,
        "studentCount": summary.student_count,
    }))
}

fn handle_import_bundle(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let store = require_store(state)?;
    let in_path = get_required_str(&req.params, "inPath")?;
    let summary =
        backup::import_bundle(store, &PathBuf::from(&in_path)).map_err(|e| io_failed(e, &in_path))?;
    Ok(json!({
        "bundleFormat": summary.bundle_format,
        "added": summary.added,
        "skipped": summary.skipped,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "backup.exportBundle" => handle_export_bundle(state, req),
        "backup.importBundle" => handle_import_bundle(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
