use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::Url;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{find_login, Backend};
use crate::error::{StoreError, StoreResult};
use crate::model::Student;
use crate::rows::{cell_text, decode_object};

const BACKEND: &str = "script";

/// Remote store behind a script web app. Every call is a JSON POST of
/// `{"action": ..}` answered by `{"success": bool, ..}`.
pub struct ScriptBackend {
    http: Client,
    url: Url,
}

impl ScriptBackend {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid script url {url:?}"))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, url })
    }

    /// POST one action and return the reply object, whatever its `success`.
    fn post(&self, action: &str, payload: Value) -> StoreResult<Map<String, Value>> {
        let mut body = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        body.insert("action".into(), json!(action));
        debug!(action, "script request");

        let response = self
            .http
            .post(self.url.clone())
            .json(&Value::Object(body))
            .send()
            .map_err(|e| StoreError::unavailable(BACKEND, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::unavailable(
                BACKEND,
                format!("{action}: http {}", status.as_u16()),
            ));
        }
        let reply: Value = response
            .json()
            .map_err(|e| StoreError::unavailable(BACKEND, format!("{action}: {e}")))?;
        match reply {
            Value::Object(reply) => Ok(reply),
            _ => Err(StoreError::unavailable(BACKEND, format!("{action}: reply is not an object"))),
        }
    }

    fn call(&self, action: &str, payload: Value) -> StoreResult<Map<String, Value>> {
        let reply = self.post(action, payload)?;
        if succeeded(&reply) {
            return Ok(reply);
        }
        let message = reply.get("message").map(cell_text).unwrap_or_default();
        match reply.get("error").map(cell_text).as_deref() {
            Some("not_found") => Err(StoreError::NotFound(message)),
            Some("conflict") => Err(StoreError::Conflict(message)),
            other => Err(StoreError::unavailable(
                BACKEND,
                format!("{action}: {} {message}", other.unwrap_or("failed")),
            )),
        }
    }
}

fn succeeded(reply: &Map<String, Value>) -> bool {
    reply.get("success").and_then(Value::as_bool) == Some(true)
}

/// Whether a failed reply means the script has no such action, rather than a
/// real failure of it.
fn unknown_action(reply: &Map<String, Value>) -> bool {
    let error = reply.get("error").map(cell_text).unwrap_or_default();
    let message = reply.get("message").map(cell_text).unwrap_or_default();
    error == "unknown_action" || message.to_lowercase().starts_with("unknown action")
}

fn student_from_value(value: &Value) -> Option<Student> {
    let object = value.as_object()?;
    match Student::from_record(&decode_object(object)) {
        Ok(student) => Some(student),
        Err(e) => {
            warn!(error = %e, "skipping unreadable student from script");
            None
        }
    }
}

impl Backend for ScriptBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn get(&self, id: &str) -> StoreResult<Option<Student>> {
        match self.call("get", json!({ "id": id.trim() })) {
            Ok(reply) => Ok(reply.get("student").and_then(student_from_value)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn get_all(&self) -> StoreResult<Vec<Student>> {
        let reply = self.call("get_all", json!({}))?;
        Ok(reply
            .get("students")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(student_from_value).collect())
            .unwrap_or_default())
    }

    fn add(&self, student: &Student) -> StoreResult<()> {
        self.call("add", json!({ "student": student.to_record() }))
            .map_err(|e| match e {
                StoreError::Conflict(_) => StoreError::Conflict(student.id.clone()),
                other => other,
            })?;
        Ok(())
    }

    fn replace(&self, student: &Student) -> StoreResult<()> {
        self.call(
            "update",
            json!({ "id": student.id, "student": student.to_record() }),
        )
        .map_err(|e| match e {
            StoreError::NotFound(_) => StoreError::NotFound(student.id.clone()),
            other => other,
        })?;
        Ok(())
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        match self.call("delete", json!({ "id": id.trim() })) {
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Checked by the script itself, so the roster never crosses the wire.
    /// Scripts without an `authenticate` action fall back to a local scan.
    fn authenticate(&self, login: &str, password: &str) -> StoreResult<Option<Student>> {
        let reply = self.post("authenticate", json!({ "id": login.trim(), "password": password }))?;
        if succeeded(&reply) {
            return Ok(reply
                .get("student")
                .and_then(student_from_value)
                .map(Student::without_password));
        }
        if unknown_action(&reply) {
            debug!("script has no authenticate action, scanning roster");
            let students = self.get_all()?;
            return Ok(find_login(&students, login, password)
                .cloned()
                .map(Student::without_password));
        }
        match reply.get("error").map(cell_text).as_deref() {
            None | Some("" | "unauthorized" | "not_found") => {}
            Some(other) => warn!(error = other, "script rejected authenticate"),
        }
        Ok(None)
    }
}
