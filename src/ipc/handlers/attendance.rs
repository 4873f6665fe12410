use serde_json::json;

use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_param, get_required_str, require_store};
use crate::ipc::types::{AppState, Request};
use crate::roster::AttendanceMark;

fn handle_attendance_submit(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = require_store(state)?;
    let date = get_required_str(&req.params, "date")?;

    let summary = if req.params.get("records").is_some() {
        let marks: Vec<AttendanceMark> = get_param(&req.params, "records")?;
        store.submit_attendance(&date, &marks)?
    } else if req.params.get("absentIds").is_some() {
        let absent: Vec<String> = get_param(&req.params, "absentIds")?;
        store.submit_absentees(&date, &absent)?
    } else {
        return Err(HandlerErr::bad_params("missing records or absentIds"));
    };
    serde_json::to_value(summary).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn handle_attendance_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = require_store(state)?;
    let date = get_optional_str(&req.params, "date");
    let records = store.attendance(date.as_deref())?;
    Ok(json!({ "records": records }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "attendance.submit" => handle_attendance_submit(state, req),
        "attendance.get" => handle_attendance_get(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
