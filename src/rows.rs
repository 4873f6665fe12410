//! Header-keyed spreadsheet rows and the records built from them.
//!
//! A sheet is an ordered header row plus data rows of text cells. Columns whose
//! header ends in [`JSON_SUFFIX`] hold JSON-encoded structured values; the
//! suffix is dropped from the record key (`tests_json` becomes `tests`).

use serde_json::{Map, Value};
use tracing::warn;

pub const JSON_SUFFIX: &str = "_json";

pub type Record = Map<String, Value>;

pub fn header_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn json_base(key: &str) -> Option<&str> {
    key.strip_suffix(JSON_SUFFIX).filter(|base| !base.is_empty())
}

/// Build a record from a header row and one data row.
///
/// Never fails: short rows default missing text cells to `""` and missing
/// structured cells to `[]`, extra cells are ignored.
pub fn row_to_record<H, V>(headers: &[H], values: &[V]) -> Record
where
    H: AsRef<str>,
    V: AsRef<str>,
{
    let mut record = Record::new();
    for (idx, header) in headers.iter().enumerate() {
        let key = header_key(header.as_ref());
        if key.is_empty() {
            continue;
        }
        let cell = values.get(idx).map(|v| v.as_ref()).unwrap_or("");
        match json_base(&key) {
            Some(base) => {
                if !record.contains_key(base) {
                    let decoded = decode_json_cell(base, cell);
                    record.insert(base.to_string(), decoded);
                }
            }
            None => {
                record
                    .entry(key)
                    .or_insert_with(|| Value::String(cell.to_string()));
            }
        }
    }
    record
}

/// Decode a structured cell. Blank, `null` and malformed input all become an
/// empty list.
pub fn decode_json_cell(field: &str, cell: &str) -> Value {
    let t = cell.trim();
    if t.is_empty() {
        return Value::Array(Vec::new());
    }
    match serde_json::from_str::<Value>(t) {
        Ok(Value::Null) => Value::Array(Vec::new()),
        Ok(v) => v,
        Err(e) => {
            warn!(field, error = %e, "malformed JSON cell, using empty list");
            Value::Array(Vec::new())
        }
    }
}

/// Apply the `_json` column convention to an object that is already keyed,
/// such as a record returned by the script proxy.
pub fn decode_object(object: &Map<String, Value>) -> Record {
    let mut record = Record::new();
    for (raw_key, value) in object {
        let key = header_key(raw_key);
        match json_base(&key) {
            Some(base) => {
                let decoded = match value {
                    Value::String(s) => decode_json_cell(base, s),
                    Value::Null => Value::Array(Vec::new()),
                    other => other.clone(),
                };
                record.insert(base.to_string(), decoded);
            }
            None => {
                record.entry(key).or_insert_with(|| value.clone());
            }
        }
    }
    record
}

/// Render a record back into cells ordered by `headers`.
pub fn record_to_row<H: AsRef<str>>(headers: &[H], record: &Record) -> Vec<String> {
    headers
        .iter()
        .map(|header| {
            let key = header_key(header.as_ref());
            match json_base(&key) {
                Some(base) => match record.get(base) {
                    Some(Value::Null) | None => String::new(),
                    Some(v) => v.to_string(),
                },
                None => record.get(&key).map(cell_text).unwrap_or_default(),
            }
        })
        .collect()
}

/// Render `record` over an existing row. Columns the record carries are
/// rewritten, and a structured object cell keeps any keys the record does not
/// set. Every other cell keeps its current text.
pub fn merge_row<H, V>(headers: &[H], existing: &[V], record: &Record) -> Vec<String>
where
    H: AsRef<str>,
    V: AsRef<str>,
{
    let rendered = record_to_row(headers, record);
    headers
        .iter()
        .zip(rendered)
        .enumerate()
        .map(|(idx, (header, cell))| {
            let current = existing.get(idx).map(|v| v.as_ref()).unwrap_or("");
            let key = header_key(header.as_ref());
            let base = json_base(&key);
            match record.get(base.unwrap_or(key.as_str())) {
                None => current.to_string(),
                Some(Value::Object(next)) if base.is_some() => {
                    match serde_json::from_str::<Value>(current.trim()) {
                        Ok(Value::Object(mut merged)) => {
                            merged.extend(next.clone());
                            Value::Object(merged).to_string()
                        }
                        _ => cell,
                    }
                }
                Some(_) => cell,
            }
        })
        .collect()
}

/// Text form of a scalar field. Strings are trimmed, nulls are blank.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Read a text field from a record, trying each alias in order.
pub fn text_field(record: &Record, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| record.get(*k))
        .map(cell_text)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}
