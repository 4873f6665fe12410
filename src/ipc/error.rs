use serde_json::json;

use crate::error::StoreError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        let details = match &e {
            StoreError::Unavailable { backend, .. } => Some(json!({ "backend": backend })),
            StoreError::NotFound(id) | StoreError::Conflict(id) => Some(json!({ "studentId": id })),
            _ => None,
        };
        Self {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_carry_their_wire_code() {
        let resp = HandlerErr::from(StoreError::Conflict("STU001".into())).response("7");
        assert_eq!(resp["ok"], false);
        assert_eq!(resp["id"], "7");
        assert_eq!(resp["error"]["code"], "conflict");
        assert_eq!(resp["error"]["details"]["studentId"], "STU001");

        let resp = HandlerErr::from(StoreError::unavailable("sheets", "timed out")).response("8");
        assert_eq!(resp["error"]["code"], "backend_unavailable");
        assert_eq!(resp["error"]["details"]["backend"], "sheets");
    }

    #[test]
    fn err_omits_absent_details() {
        let resp = err("1", "bad_params", "missing studentId", None);
        assert!(resp["error"].get("details").is_none());
    }
}
