use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar(envs: &[(&str, &str)]) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rosterd");
    let mut cmd = Command::new(exe);
    cmd.env("ROSTER_BACKEND", "memory")
        .env("ROSTER_FALLBACK", "none")
        .env("ROSTER_LOGIN_FAILURE_DELAY_MS", "0");
    for (k, v) in envs {
        cmd.env(k, v);
    }
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rosterd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Send a request expected to fail; returns the error object.
fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().unwrap_or_else(|| json!({}))
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    for (id, name) in [("S1", "Asha"), ("S2", "Ravi"), ("S3", "Meera")] {
        request_ok(
            stdin,
            reader,
            &format!("create-{id}"),
            "students.create",
            json!({ "student": { "id": id, "name": name, "password": "pw", "class": "Class 9" } }),
        );
    }
}

#[test]
fn absent_ids_mark_everyone_else_present() {
    let (_child, mut stdin, mut reader) = spawn_sidecar(&[]);
    seed(&mut stdin, &mut reader);

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.submit",
        json!({ "date": "2024-08-01", "absentIds": ["s2", "S9"] }),
    );
    assert_eq!(summary["date"], "2024-08-01");
    assert_eq!(summary["updated"].as_array().map(|a| a.len()), Some(3));
    assert_eq!(summary["absentees"], json!(["Ravi"]));
    assert_eq!(summary["unknown"], json!(["S9"]));

    let day = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.get",
        json!({ "date": "2024-08-01" }),
    );
    let rows: Vec<(String, String)> = day["records"]
        .as_array()
        .expect("records")
        .iter()
        .map(|r| {
            (
                r["studentId"].as_str().unwrap_or_default().to_string(),
                r["status"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    assert_eq!(
        rows,
        vec![
            ("S1".to_string(), "Present".to_string()),
            ("S2".to_string(), "Absent".to_string()),
            ("S3".to_string(), "Present".to_string()),
        ]
    );

    let ravi = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.get",
        json!({ "studentId": "S2" }),
    );
    assert_eq!(ravi["student"]["attendancePercentage"], 0.0);
}

#[test]
fn explicit_records_replace_the_same_date() {
    let (_child, mut stdin, mut reader) = spawn_sidecar(&[]);
    seed(&mut stdin, &mut reader);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.submit",
        json!({ "date": "2024-08-01", "records": [{ "studentId": "S1", "status": "Absent" }] }),
    );
    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.submit",
        json!({ "date": "2024-08-01", "records": [
            { "studentId": "s1", "status": "present" },
            { "studentId": "S3", "status": "Present" }
        ] }),
    );
    assert_eq!(summary["absentees"], json!([]));

    let s1 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.get",
        json!({ "studentId": "S1" }),
    );
    assert_eq!(s1["student"]["attendance"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(s1["student"]["attendancePercentage"], 100.0);

    let all = request_ok(&mut stdin, &mut reader, "4", "attendance.get", json!({}));
    assert_eq!(all["records"].as_array().map(|a| a.len()), Some(2));
}

#[test]
fn attendance_submit_validates_input() {
    let (_child, mut stdin, mut reader) = spawn_sidecar(&[]);
    seed(&mut stdin, &mut reader);

    let e = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.submit",
        json!({ "date": "01/08/2024", "absentIds": [] }),
    );
    assert_eq!(e["code"], "bad_params");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.submit",
        json!({ "date": "2024-08-01" }),
    );
    assert_eq!(e["code"], "bad_params");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.submit",
        json!({ "date": "2024-08-01", "records": [{ "studentId": "S1", "status": "late" }] }),
    );
    assert_eq!(e["code"], "bad_params");
}
