//! Spreadsheet-backed store.
//!
//! Layout, one sheet per concern, header row first:
//! - `Students`: one row per student, optional `*_json` columns
//! - `Tests`: `StudentID, TestName, Date, Marks, Total`
//! - `Attendance`: `StudentID, Date, Status`
//! - `StudentAuth`: `Username, Password, StudentID`
//!
//! Row indices passed to [`SheetClient`] are zero-based and include the header
//! row, so the first data row is index 1.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::{Method, Url};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{find_login, Backend};
use crate::credential::verify_password;
use crate::error::{StoreError, StoreResult};
use crate::model::Student;
use crate::normalize::{canonical_id, keys_match, KeyKind};
use crate::rows::{merge_row, record_to_row, row_to_record, text_field, Record};

const BACKEND: &str = "sheets";

const STUDENTS: &str = "Students";
const TESTS: &str = "Tests";
const ATTENDANCE: &str = "Attendance";
const AUTH: &str = "StudentAuth";

const STUDENT_HEADERS: [&str; 7] = [
    "id",
    "name",
    "password",
    "email",
    "phone",
    "student_class",
    "enrollment_date",
];
const TEST_HEADERS: [&str; 5] = ["StudentID", "TestName", "Date", "Marks", "Total"];
const ATTENDANCE_HEADERS: [&str; 3] = ["StudentID", "Date", "Status"];
const AUTH_HEADERS: [&str; 3] = ["Username", "Password", "StudentID"];

/// Row-level access to a spreadsheet.
pub trait SheetClient: Send + Sync {
    /// Create `title` if it does not exist and write `headers` into it when it
    /// has no rows at all.
    fn ensure_sheet(&self, title: &str, headers: &[&str]) -> StoreResult<()>;

    /// Every row of the sheet, header row included.
    fn read_rows(&self, title: &str) -> StoreResult<Vec<Vec<String>>>;

    fn append_row(&self, title: &str, row: &[String]) -> StoreResult<()>;

    fn update_row(&self, title: &str, index: usize, row: &[String]) -> StoreResult<()>;

    fn delete_row(&self, title: &str, index: usize) -> StoreResult<()>;
}

/// A sheet snapshot: header row plus data rows.
struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn load<C: SheetClient>(client: &C, title: &str) -> StoreResult<Table> {
        let mut rows = client.read_rows(title)?;
        if rows.is_empty() {
            return Ok(Table {
                headers: Vec::new(),
                rows,
            });
        }
        let headers = rows.remove(0);
        Ok(Table { headers, rows })
    }

    /// `(sheet index, record)` for every data row.
    fn records(&self) -> impl Iterator<Item = (usize, Record)> + '_ {
        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| (i + 1, row_to_record(&self.headers, row)))
    }

    /// Sheet indices of the rows whose `StudentID` column names `id`.
    fn rows_for(&self, id: &str) -> Vec<usize> {
        self.records()
            .filter(|(_, rec)| keys_match(KeyKind::Identifier, &text_field(rec, &["studentid"]), id))
            .map(|(i, _)| i)
            .collect()
    }
}

pub struct SheetsBackend<C> {
    client: C,
    // Row positions shift on delete; one writer at a time.
    write_guard: Mutex<()>,
}

impl<C: SheetClient> SheetsBackend<C> {
    pub fn open(client: C) -> StoreResult<Self> {
        client.ensure_sheet(STUDENTS, &STUDENT_HEADERS)?;
        client.ensure_sheet(AUTH, &AUTH_HEADERS)?;
        client.ensure_sheet(TESTS, &TEST_HEADERS)?;
        client.ensure_sheet(ATTENDANCE, &ATTENDANCE_HEADERS)?;
        Ok(Self {
            client,
            write_guard: Mutex::new(()),
        })
    }

    fn load_students(&self) -> StoreResult<Vec<(usize, Student)>> {
        let students = Table::load(&self.client, STUDENTS)?;
        let tests = child_rows(&Table::load(&self.client, TESTS)?);
        let attendance = child_rows(&Table::load(&self.client, ATTENDANCE)?);

        let mut out = Vec::new();
        for (index, mut record) in students.records() {
            let id = text_field(&record, &["id"]);
            if id.is_empty() {
                continue;
            }
            let key = canonical_id(&id);
            // Child sheets take precedence over embedded JSON columns.
            if let Some(rows) = tests.get(&key) {
                record.insert("tests".into(), Value::Array(rows.clone()));
            }
            if let Some(rows) = attendance.get(&key) {
                record.insert("attendance_log".into(), Value::Array(rows.clone()));
            }
            match Student::from_record(&record) {
                Ok(student) => out.push((index, student)),
                Err(e) => warn!(row = index, error = %e, "skipping unreadable student row"),
            }
        }
        Ok(out)
    }

    fn find(&self, id: &str) -> StoreResult<Option<(usize, Student)>> {
        Ok(self
            .load_students()?
            .into_iter()
            .find(|(_, s)| keys_match(KeyKind::Identifier, &s.id, id)))
    }

    fn student_row(&self, student: &Student) -> StoreResult<Vec<String>> {
        let table = Table::load(&self.client, STUDENTS)?;
        let headers = if table.headers.is_empty() {
            STUDENT_HEADERS.iter().map(|h| h.to_string()).collect()
        } else {
            table.headers
        };
        Ok(record_to_row(&headers, &student.to_record()))
    }

    /// `student` written over the sheet row at `index`, keeping columns the
    /// model does not know about.
    fn merged_student_row(&self, index: usize, student: &Student) -> StoreResult<Vec<String>> {
        let table = Table::load(&self.client, STUDENTS)?;
        let current = index
            .checked_sub(1)
            .and_then(|i| table.rows.get(i))
            .cloned()
            .unwrap_or_default();
        Ok(merge_row(&table.headers, &current, &student.to_record()))
    }

    fn delete_rows(&self, title: &str, mut indices: Vec<usize>) -> StoreResult<()> {
        indices.sort_unstable();
        for index in indices.into_iter().rev() {
            self.client.delete_row(title, index)?;
        }
        Ok(())
    }

    fn write_tests(&self, id: &str, student: &Student) -> StoreResult<()> {
        for t in &student.tests {
            self.client.append_row(
                TESTS,
                &[
                    id.to_string(),
                    t.name.clone(),
                    t.date.clone(),
                    t.marks.to_string(),
                    t.total.to_string(),
                ],
            )?;
        }
        Ok(())
    }

    fn write_attendance(&self, id: &str, student: &Student) -> StoreResult<()> {
        for a in &student.attendance {
            self.client.append_row(
                ATTENDANCE,
                &[id.to_string(), a.date.clone(), a.status.as_str().to_string()],
            )?;
        }
        Ok(())
    }

    /// Keep exactly one `StudentAuth` row per student holding its current
    /// password, or none when the student has no password.
    fn sync_auth(&self, id: &str, password: Option<&str>) -> StoreResult<()> {
        let table = Table::load(&self.client, AUTH)?;
        let existing = table.rows_for(id);
        let Some(password) = password else {
            return self.delete_rows(AUTH, existing);
        };
        let row = [id.to_string(), password.to_string(), id.to_string()];
        match existing.split_first() {
            Some((first, rest)) => {
                self.delete_rows(AUTH, rest.to_vec())?;
                self.client.update_row(AUTH, *first, &row)
            }
            None => self.client.append_row(AUTH, &row),
        }
    }

    fn lock_writes(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_guard.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Child rows grouped by normalized student id, in sheet order.
fn child_rows(table: &Table) -> HashMap<String, Vec<Value>> {
    let mut out: HashMap<String, Vec<Value>> = HashMap::new();
    for (_, record) in table.records() {
        let key = canonical_id(&text_field(&record, &["studentid"]));
        if key.is_empty() {
            continue;
        }
        out.entry(key).or_default().push(Value::Object(record));
    }
    out
}

impl<C: SheetClient> Backend for SheetsBackend<C> {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn get(&self, id: &str) -> StoreResult<Option<Student>> {
        Ok(self.find(id)?.map(|(_, s)| s))
    }

    fn get_all(&self) -> StoreResult<Vec<Student>> {
        Ok(self.load_students()?.into_iter().map(|(_, s)| s).collect())
    }

    fn add(&self, student: &Student) -> StoreResult<()> {
        let _guard = self.lock_writes();
        if let Some((_, existing)) = self.find(&student.id)? {
            return Err(StoreError::Conflict(existing.id));
        }
        let row = self.student_row(student)?;
        self.client.append_row(STUDENTS, &row)?;
        self.write_tests(&student.id, student)?;
        self.write_attendance(&student.id, student)?;
        self.sync_auth(&student.id, student.password.as_deref())
    }

    fn replace(&self, student: &Student) -> StoreResult<()> {
        let _guard = self.lock_writes();
        let Some((index, current)) = self.find(&student.id)? else {
            return Err(StoreError::NotFound(student.id.clone()));
        };
        let id = current.id.clone();
        let next = Student {
            id: id.clone(),
            ..student.clone()
        };
        self.client
            .update_row(STUDENTS, index, &self.merged_student_row(index, &next)?)?;

        if current.tests != next.tests {
            let stale = Table::load(&self.client, TESTS)?.rows_for(&id);
            self.delete_rows(TESTS, stale)?;
            self.write_tests(&id, &next)?;
        }
        if current.attendance != next.attendance {
            let stale = Table::load(&self.client, ATTENDANCE)?.rows_for(&id);
            self.delete_rows(ATTENDANCE, stale)?;
            self.write_attendance(&id, &next)?;
        }
        if current.password != next.password {
            self.sync_auth(&id, next.password.as_deref())?;
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        let _guard = self.lock_writes();
        let Some((index, current)) = self.find(id)? else {
            return Ok(());
        };
        self.client.delete_row(STUDENTS, index)?;
        for title in [TESTS, ATTENDANCE, AUTH] {
            let stale = Table::load(&self.client, title)?.rows_for(&current.id);
            self.delete_rows(title, stale)?;
        }
        Ok(())
    }

    /// `StudentAuth` is consulted first; a miss falls through to the
    /// `Students` sheet itself.
    fn authenticate(&self, login: &str, password: &str) -> StoreResult<Option<Student>> {
        let auth = Table::load(&self.client, AUTH)?;
        for (_, record) in auth.records() {
            let username = text_field(&record, &["username"]);
            let stored = text_field(&record, &["password"]);
            if !keys_match(KeyKind::Identifier, &username, login) || !verify_password(&stored, password) {
                continue;
            }
            let mut student_id = text_field(&record, &["studentid"]);
            if student_id.is_empty() {
                student_id = username;
            }
            if let Some(student) = self.get(&student_id)? {
                return Ok(Some(student.without_password()));
            }
            debug!(student_id = %student_id, "auth row points at a missing student");
        }

        let students = self.get_all()?;
        Ok(find_login(&students, login, password)
            .cloned()
            .map(Student::without_password))
    }
}

/// [`SheetClient`] over the Google Sheets v4 REST API.
pub struct HttpSheetClient {
    http: Client,
    spreadsheet: Url,
    token: String,
}

impl HttpSheetClient {
    pub fn new(endpoint: &str, spreadsheet_id: &str, token: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut spreadsheet =
            Url::parse(endpoint).with_context(|| format!("invalid sheets endpoint {endpoint:?}"))?;
        spreadsheet
            .path_segments_mut()
            .map_err(|_| anyhow::anyhow!("sheets endpoint cannot be a base url: {endpoint:?}"))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", spreadsheet_id]);
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            spreadsheet,
            token: token.to_string(),
        })
    }

    /// `<spreadsheet>/<segment>`, or `<spreadsheet><suffix>` for the
    /// `:batchUpdate` style method calls on the spreadsheet itself.
    fn url(&self, segments: &[&str], suffix: &str, query: &[(&str, &str)]) -> Url {
        let mut url = self.spreadsheet.clone();
        if !suffix.is_empty() {
            let last = url.path().rsplit('/').next().unwrap_or_default().to_string();
            if let Ok(mut path) = url.path_segments_mut() {
                path.pop().push(&format!("{last}{suffix}"));
            }
        }
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    fn call(&self, method: Method, url: Url, body: Option<Value>) -> StoreResult<Value> {
        debug!(method = %method, url = %url, "sheets request");
        let mut request = self.http.request(method, url).bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .map_err(|e| StoreError::unavailable(BACKEND, e))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(StoreError::unavailable(
                BACKEND,
                format!("http {}: {}", status.as_u16(), text.trim()),
            ));
        }
        let text = response
            .text()
            .map_err(|e| StoreError::unavailable(BACKEND, e))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| StoreError::unavailable(BACKEND, e))
    }

    fn sheet_ids(&self) -> StoreResult<HashMap<String, i64>> {
        let meta = self.call(
            Method::GET,
            self.url(&[], "", &[("fields", "sheets.properties")]),
            None,
        )?;
        let mut ids = HashMap::new();
        for sheet in meta["sheets"].as_array().into_iter().flatten() {
            let props = &sheet["properties"];
            if let (Some(title), Some(id)) = (props["title"].as_str(), props["sheetId"].as_i64()) {
                ids.insert(title.to_string(), id);
            }
        }
        Ok(ids)
    }

    fn batch_update(&self, request: Value) -> StoreResult<()> {
        self.call(
            Method::POST,
            self.url(&[], ":batchUpdate", &[]),
            Some(json!({ "requests": [request] })),
        )?;
        Ok(())
    }
}

fn cell_string(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl SheetClient for HttpSheetClient {
    fn ensure_sheet(&self, title: &str, headers: &[&str]) -> StoreResult<()> {
        if !self.sheet_ids()?.contains_key(title) {
            self.batch_update(json!({ "addSheet": { "properties": { "title": title } } }))?;
        }
        if self.read_rows(title)?.is_empty() {
            let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
            self.append_row(title, &headers)?;
        }
        Ok(())
    }

    fn read_rows(&self, title: &str) -> StoreResult<Vec<Vec<String>>> {
        let body = self.call(Method::GET, self.url(&["values", title], "", &[]), None)?;
        let rows = body["values"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        row.as_array()
                            .map(|cells| cells.iter().map(cell_string).collect())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    fn append_row(&self, title: &str, row: &[String]) -> StoreResult<()> {
        let range = format!("{title}:append");
        self.call(
            Method::POST,
            self.url(
                &["values", &range],
                "",
                &[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")],
            ),
            Some(json!({ "values": [row] })),
        )?;
        Ok(())
    }

    fn update_row(&self, title: &str, index: usize, row: &[String]) -> StoreResult<()> {
        let range = format!("{title}!A{}", index + 1);
        self.call(
            Method::PUT,
            self.url(&["values", &range], "", &[("valueInputOption", "RAW")]),
            Some(json!({ "values": [row] })),
        )?;
        Ok(())
    }

    fn delete_row(&self, title: &str, index: usize) -> StoreResult<()> {
        let Some(sheet_id) = self.sheet_ids()?.get(title).copied() else {
            return Err(StoreError::unavailable(BACKEND, format!("sheet {title} is missing")));
        };
        self.batch_update(json!({
            "deleteDimension": {
                "range": {
                    "sheetId": sheet_id,
                    "dimension": "ROWS",
                    "startIndex": index,
                    "endIndex": index + 1,
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::digest_password;
    use crate::model::{sample_student, AttendanceStatus, StudentPatch};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct FakeSheets {
        sheets: Arc<Mutex<BTreeMap<String, Vec<Vec<String>>>>>,
        offline: Arc<AtomicBool>,
    }

    impl FakeSheets {
        fn check(&self) -> StoreResult<()> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(StoreError::unavailable(BACKEND, "offline"));
            }
            Ok(())
        }

        fn rows(&self, title: &str) -> Vec<Vec<String>> {
            self.sheets.lock().expect("lock").get(title).cloned().unwrap_or_default()
        }

        fn seed(&self, title: &str, rows: &[&[&str]]) {
            let rows = rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect();
            self.sheets.lock().expect("lock").insert(title.to_string(), rows);
        }
    }

    impl SheetClient for FakeSheets {
        fn ensure_sheet(&self, title: &str, headers: &[&str]) -> StoreResult<()> {
            self.check()?;
            let mut sheets = self.sheets.lock().expect("lock");
            let rows = sheets.entry(title.to_string()).or_default();
            if rows.is_empty() {
                rows.push(headers.iter().map(|h| h.to_string()).collect());
            }
            Ok(())
        }

        fn read_rows(&self, title: &str) -> StoreResult<Vec<Vec<String>>> {
            self.check()?;
            Ok(self.rows(title))
        }

        fn append_row(&self, title: &str, row: &[String]) -> StoreResult<()> {
            self.check()?;
            self.sheets
                .lock()
                .expect("lock")
                .entry(title.to_string())
                .or_default()
                .push(row.to_vec());
            Ok(())
        }

        fn update_row(&self, title: &str, index: usize, row: &[String]) -> StoreResult<()> {
            self.check()?;
            let mut sheets = self.sheets.lock().expect("lock");
            let rows = sheets.get_mut(title).expect("sheet");
            rows[index] = row.to_vec();
            Ok(())
        }

        fn delete_row(&self, title: &str, index: usize) -> StoreResult<()> {
            self.check()?;
            let mut sheets = self.sheets.lock().expect("lock");
            sheets.get_mut(title).expect("sheet").remove(index);
            Ok(())
        }
    }

    fn backend() -> (FakeSheets, SheetsBackend<FakeSheets>) {
        let fake = FakeSheets::default();
        let backend = SheetsBackend::open(fake.clone()).expect("open");
        (fake, backend)
    }

    #[test]
    fn open_writes_header_rows() {
        let (fake, _) = backend();
        assert_eq!(fake.rows(STUDENTS)[0], STUDENT_HEADERS);
        assert_eq!(fake.rows(AUTH)[0], AUTH_HEADERS);
        assert_eq!(fake.rows(TESTS)[0], TEST_HEADERS);
        assert_eq!(fake.rows(ATTENDANCE)[0], ATTENDANCE_HEADERS);
    }

    #[test]
    fn add_writes_child_rows_and_reads_back() {
        let (fake, b) = backend();
        let s = sample_student("STU001", "Rahul Kumar", "sealed");
        b.add(&s).expect("add");

        assert_eq!(fake.rows(TESTS).len(), 2);
        assert_eq!(fake.rows(ATTENDANCE).len(), 3);
        assert_eq!(fake.rows(AUTH)[1], vec!["STU001", "sealed", "STU001"]);
        assert_eq!(b.get("stuoo1").expect("get"), Some(s));
        assert!(matches!(
            b.add(&sample_student("stu001", "Dup", "x")),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn replace_rewrites_only_changed_children() {
        let (fake, b) = backend();
        b.add(&sample_student("STU001", "A", "pw")).expect("add");
        b.add(&sample_student("STU002", "B", "pw")).expect("add");

        let mut next = b.get("STU001").expect("get").expect("present");
        next.mark_attendance("2024-07-03", AttendanceStatus::Absent);
        b.replace(&next).expect("replace");

        let attendance = fake.rows(ATTENDANCE);
        assert_eq!(attendance.len(), 1 + 3 + 2);
        assert_eq!(
            attendance.last().expect("row"),
            &vec!["STU001".to_string(), "2024-07-03".into(), "Absent".into()]
        );
        assert_eq!(fake.rows(TESTS).len(), 3);
        assert_eq!(b.get("STU001").expect("get"), Some(next));
        assert_eq!(
            b.get("STU002").expect("get"),
            Some(sample_student("STU002", "B", "pw"))
        );
    }

    #[test]
    fn delete_removes_every_row_for_the_student() {
        let (fake, b) = backend();
        b.add(&sample_student("STU001", "A", "pw")).expect("add");
        b.add(&sample_student("STU002", "B", "pw")).expect("add");
        b.delete("stu001").expect("delete");
        b.delete("stu001").expect("delete again");

        for title in [STUDENTS, TESTS, ATTENDANCE, AUTH] {
            assert!(fake.rows(title).iter().skip(1).all(|r| r[0] != "STU001"), "{title}");
        }
        assert_eq!(b.get_all().expect("all").len(), 1);
    }

    #[test]
    fn legacy_sheet_with_embedded_json_and_plaintext_auth() {
        let fake = FakeSheets::default();
        fake.seed(
            STUDENTS,
            &[
                &["ID ", "Name", "Password", "Student_Class", "Tests_JSON", "attendance_log_json"],
                &[
                    "STU001",
                    "Rahul Kumar",
                    "rahul123",
                    "Class 10",
                    r#"[{"name":"Unit 1","date":"2024-07-01","marks":40,"total":50}]"#,
                    "not json",
                ],
            ],
        );
        fake.seed(AUTH, &[&["Username", "Password", "StudentID"], &["STU001", "rahul123", "STU001"]]);
        let b = SheetsBackend::open(fake.clone()).expect("open");

        let s = b.get("STU001").expect("get").expect("present");
        assert_eq!(s.tests.len(), 1);
        assert!(s.attendance.is_empty());

        let found = b.authenticate("stu001", " rahul123 ").expect("auth").expect("match");
        assert_eq!(found.password, None);
        assert!(b.authenticate("STU001", "wrong").expect("auth").is_none());
        assert!(b.authenticate("Rahul Kumar", "rahul123").expect("auth").is_some());
    }

    #[test]
    fn update_keeps_columns_outside_the_model() {
        let fake = FakeSheets::default();
        fake.seed(
            STUDENTS,
            &[
                &["id", "name", "password", "student_class", "progress_json", "guardian"],
                &[
                    "STU001",
                    "Rahul Kumar",
                    "rahul123",
                    "Class 10",
                    r#"{"completion":0,"status":"New","performance":"N/A"}"#,
                    "Mr Kumar",
                ],
            ],
        );
        let b = SheetsBackend::open(fake.clone()).expect("open");

        let patch = StudentPatch {
            name: Some("Rahul K".into()),
            phone: Some("999".into()),
            ..StudentPatch::default()
        };
        b.update("STU001", &patch).expect("update");

        let row = &fake.rows(STUDENTS)[1];
        assert_eq!(row[0], "STU001");
        assert_eq!(row[1], "Rahul K");
        assert_eq!(row[2], "rahul123");
        assert_eq!(row[3], "Class 10");
        let progress: Value = serde_json::from_str(&row[4]).expect("progress");
        assert_eq!(progress["performance"], "N/A");
        assert_eq!(progress["status"], "New");
        assert_eq!(row[5], "Mr Kumar");
    }

    #[test]
    fn auth_sheet_follows_password_changes() {
        let (fake, b) = backend();
        let mut s = sample_student("STU001", "A", "");
        s.password = digest_password("first");
        b.add(&s).expect("add");
        s.password = digest_password("second");
        b.replace(&s).expect("replace");

        assert_eq!(fake.rows(AUTH).len(), 2);
        assert!(b.authenticate("STU001", "second").expect("auth").is_some());
        assert!(b.authenticate("STU001", "first").expect("auth").is_none());

        s.password = None;
        b.replace(&s).expect("replace");
        assert_eq!(fake.rows(AUTH).len(), 1);
    }

    #[test]
    fn offline_client_is_unavailable() {
        let (fake, b) = backend();
        fake.offline.store(true, Ordering::SeqCst);
        assert!(b.get_all().expect_err("offline").is_unavailable());
        assert!(SheetsBackend::open(fake).is_err());
    }

    #[test]
    fn http_client_builds_api_urls() {
        let c = HttpSheetClient::new("https://sheets.example/", "abc", "t", Duration::from_secs(1))
            .expect("client");
        assert_eq!(
            c.url(&["values", "Students"], "", &[]).as_str(),
            "https://sheets.example/v4/spreadsheets/abc/values/Students"
        );
        assert_eq!(
            c.url(&[], ":batchUpdate", &[]).as_str(),
            "https://sheets.example/v4/spreadsheets/abc:batchUpdate"
        );
        assert_eq!(
            c.url(&["values", "Tests!A3"], "", &[("valueInputOption", "RAW")]).as_str(),
            "https://sheets.example/v4/spreadsheets/abc/values/Tests!A3?valueInputOption=RAW"
        );
    }
}
