use serde_json::{json, Value};

use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{get_required_str, require_store};
use crate::ipc::types::{AppState, Request};
use crate::roster::TestBatch;

fn count(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

fn handle_tests_record(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let store = require_store(state)?;
    let name = get_required_str(&req.params, "testName")?;
    let date = get_required_str(&req.params, "testDate")?;
    let total = req
        .params
        .get("total")
        .and_then(count)
        .ok_or_else(|| HandlerErr::bad_params("total must be a non-negative integer"))?;
    let Some(raw_marks) = req.params.get("marks").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing marks"));
    };

    let mut marks = Vec::with_capacity(raw_marks.len());
    for (student_id, v) in raw_marks {
        let Some(m) = count(v) else {
            return Err(HandlerErr {
                code: "bad_params",
                message: format!("invalid marks for {}", student_id),
                details: Some(json!({ "studentId": student_id, "value": v })),
            });
        };
        marks.push((student_id.clone(), m));
    }

    let summary = store.record_tests(&TestBatch {
        name,
        date,
        total,
        marks,
    })?;
    Ok(json!({ "recorded": summary.recorded, "unknown": summary.unknown }))
}

fn handle_tests_leaderboard(state: &mut AppState) -> Result<Value, HandlerErr> {
    let store = require_store(state)?;
    Ok(json!({ "leaderboard": store.leaderboard()? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "tests.record" => handle_tests_record(state, req),
        "tests.leaderboard" => handle_tests_leaderboard(state),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
