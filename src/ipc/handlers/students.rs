use serde::Deserialize;
use serde_json::json;

use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{get_param, get_required_str, require_store, view};
use crate::ipc::types::{AppState, Request};
use crate::model::{AttendanceEntry, ClassLabel, Student, StudentPatch, TestEntry};

/// `students.create` payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewStudent {
    id: String,
    name: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    class: ClassLabel,
    #[serde(default)]
    enrollment_date: Option<String>,
    #[serde(default)]
    tests: Vec<TestEntry>,
    #[serde(default)]
    attendance: Vec<AttendanceEntry>,
}

fn blank_to_none(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl From<NewStudent> for Student {
    fn from(n: NewStudent) -> Self {
        Student {
            id: n.id,
            name: n.name,
            password: blank_to_none(n.password),
            email: blank_to_none(n.email),
            phone: blank_to_none(n.phone),
            class_label: n.class,
            enrollment_date: n.enrollment_date.unwrap_or_default(),
            tests: n.tests,
            attendance: n.attendance,
        }
    }
}

fn handle_students_list(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = require_store(state)?;
    let students: Vec<serde_json::Value> = store.get_all()?.iter().map(view).collect();
    Ok(json!({ "students": students }))
}

fn handle_students_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = require_store(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let student = store.get(&student_id)?;
    Ok(json!({ "student": student.as_ref().map(view) }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = require_store(state)?;
    let new: NewStudent = get_param(&req.params, "student")?;
    let student = store.add(Student::from(new))?;
    Ok(json!({ "studentId": student.id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = require_store(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let patch: StudentPatch = get_param(&req.params, "patch")?;
    let student = store.update(&student_id, patch)?;
    Ok(json!({ "student": view(&student) }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = require_store(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    store.delete(&student_id)?;
    Ok(json!({}))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => handle_students_list(state, req),
        "students.get" => handle_students_get(state, req),
        "students.create" => handle_students_create(state, req),
        "students.update" => handle_students_update(state, req),
        "students.delete" => handle_students_delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
