use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::normalize::canonical;
use crate::rows::{cell_text, header_key, text_field, Record};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn is_valid_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).is_ok()
}

pub fn today() -> String {
    chrono::Local::now().format(DATE_FORMAT).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ClassLabel {
    Class8,
    Class9,
    Class10,
}

impl ClassLabel {
    pub const ALL: [ClassLabel; 3] = [ClassLabel::Class8, ClassLabel::Class9, ClassLabel::Class10];

    pub fn as_str(self) -> &'static str {
        match self {
            ClassLabel::Class8 => "Class 8",
            ClassLabel::Class9 => "Class 9",
            ClassLabel::Class10 => "Class 10",
        }
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let c = canonical(s);
        let grade = c.strip_prefix("class").unwrap_or(&c);
        match grade {
            "8" => Ok(ClassLabel::Class8),
            "9" => Ok(ClassLabel::Class9),
            "10" => Ok(ClassLabel::Class10),
            _ => {
                let known: Vec<&str> = ClassLabel::ALL.iter().map(|c| c.as_str()).collect();
                Err(format!("unknown class {:?}, expected one of {}", s.trim(), known.join(", ")))
            }
        }
    }
}

impl TryFrom<String> for ClassLabel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClassLabel> for String {
    fn from(value: ClassLabel) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match canonical(s).as_str() {
            "present" | "p" => Ok(AttendanceStatus::Present),
            "absent" | "a" => Ok(AttendanceStatus::Absent),
            _ => Err(format!("unknown attendance status: {:?}", s.trim())),
        }
    }
}

impl TryFrom<String> for AttendanceStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AttendanceStatus> for String {
    fn from(value: AttendanceStatus) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestEntry {
    pub name: String,
    #[serde(default)]
    pub date: String,
    pub marks: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEntry {
    pub date: String,
    pub status: AttendanceStatus,
}

/// Derived course progress: attendance completion, and "New" until the first
/// attendance entry exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub completion: f64,
    pub status: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(rename = "class")]
    pub class_label: ClassLabel,
    #[serde(default)]
    pub enrollment_date: String,
    #[serde(default)]
    pub tests: Vec<TestEntry>,
    #[serde(default)]
    pub attendance: Vec<AttendanceEntry>,
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

fn parse_count(value: Option<&Value>) -> u32 {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match n {
        Some(v) if v.is_finite() && v >= 0.0 => v.round().min(u32::MAX as f64) as u32,
        _ => 0,
    }
}

/// Lowercase the keys of a loosely-shaped child object so `TestName` and
/// `testname` read the same.
fn keyed(item: &Value) -> Option<Record> {
    let obj = item.as_object()?;
    Some(obj.iter().map(|(k, v)| (header_key(k), v.clone())).collect())
}

pub fn test_entries_from_value(value: Option<&Value>) -> Vec<TestEntry> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(keyed)
        .filter_map(|rec| {
            let name = text_field(&rec, &["name", "testname"]);
            if name.is_empty() {
                warn!("skipping test entry without a name");
                return None;
            }
            Some(TestEntry {
                name,
                date: text_field(&rec, &["date"]),
                marks: parse_count(rec.get("marks")),
                total: parse_count(rec.get("total")),
            })
        })
        .collect()
}

pub fn attendance_from_value(value: Option<&Value>) -> Vec<AttendanceEntry> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(keyed)
        .filter_map(|rec| {
            let date = text_field(&rec, &["date"]);
            let status = rec.get("status").map(cell_text).unwrap_or_default();
            match status.parse::<AttendanceStatus>() {
                Ok(status) if !date.is_empty() => Some(AttendanceEntry { date, status }),
                _ => {
                    warn!(date = %date, status = %status, "skipping unreadable attendance entry");
                    None
                }
            }
        })
        .collect()
}

impl Student {
    pub fn attendance_percentage(&self) -> f64 {
        if self.attendance.is_empty() {
            return 0.0;
        }
        let present = self
            .attendance
            .iter()
            .filter(|a| a.status == AttendanceStatus::Present)
            .count();
        present as f64 / self.attendance.len() as f64 * 100.0
    }

    pub fn progress(&self) -> Progress {
        Progress {
            completion: self.attendance_percentage(),
            status: if self.attendance.is_empty() {
                "New"
            } else {
                "In Progress"
            },
        }
    }

    pub fn without_password(mut self) -> Self {
        self.password = None;
        self
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.id.trim().is_empty() {
            return Err(StoreError::validation("missing id"));
        }
        if self.name.trim().is_empty() {
            return Err(StoreError::validation("missing name"));
        }
        validate_tests(&self.tests)?;
        validate_attendance(&self.attendance)
    }

    /// Replace the entry for `date`, or append one.
    pub fn mark_attendance(&mut self, date: &str, status: AttendanceStatus) {
        match self.attendance.iter_mut().find(|a| a.date == date) {
            Some(entry) => entry.status = status,
            None => self.attendance.push(AttendanceEntry {
                date: date.to_string(),
                status,
            }),
        }
    }

    /// Replace the entry with the same test name and date, or append one.
    pub fn record_test(&mut self, entry: TestEntry) {
        let existing = self
            .tests
            .iter_mut()
            .find(|t| t.date == entry.date && canonical(&t.name) == canonical(&entry.name));
        match existing {
            Some(t) => *t = entry,
            None => self.tests.push(entry),
        }
    }

    /// Reconcile a header-keyed record into a student.
    pub fn from_record(record: &Record) -> StoreResult<Student> {
        let id = text_field(record, &["id", "studentid"]);
        if id.is_empty() {
            return Err(StoreError::validation("record has no id"));
        }
        let class_raw = text_field(record, &["student_class", "class"]);
        let class_label = class_raw
            .parse::<ClassLabel>()
            .map_err(|e| StoreError::validation(format!("student {id}: {e}")))?;
        Ok(Student {
            name: text_field(record, &["name"]),
            password: non_empty(text_field(record, &["password"])),
            email: non_empty(text_field(record, &["email"])),
            phone: non_empty(text_field(record, &["phone"])),
            class_label,
            enrollment_date: text_field(record, &["enrollment_date"]),
            tests: test_entries_from_value(record.get("tests")),
            attendance: attendance_from_value(
                record.get("attendance_log").or_else(|| record.get("attendance")),
            ),
            id,
        })
    }

    /// Header-keyed form used by spreadsheet-like backends.
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("id".into(), json!(self.id));
        record.insert("name".into(), json!(self.name));
        record.insert(
            "password".into(),
            json!(self.password.clone().unwrap_or_default()),
        );
        record.insert("email".into(), json!(self.email.clone().unwrap_or_default()));
        record.insert("phone".into(), json!(self.phone.clone().unwrap_or_default()));
        record.insert("student_class".into(), json!(self.class_label.as_str()));
        record.insert("enrollment_date".into(), json!(self.enrollment_date));
        record.insert(
            "tests".into(),
            Value::Array(
                self.tests
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "date": t.date,
                            "marks": t.marks,
                            "total": t.total,
                        })
                    })
                    .collect(),
            ),
        );
        record.insert(
            "attendance_log".into(),
            Value::Array(
                self.attendance
                    .iter()
                    .map(|a| json!({ "date": a.date, "status": a.status.as_str() }))
                    .collect(),
            ),
        );
        record.insert("progress".into(), json!(self.progress()));
        record
    }
}

fn validate_tests(tests: &[TestEntry]) -> StoreResult<()> {
    for t in tests {
        if t.name.trim().is_empty() {
            return Err(StoreError::validation("test entry missing name"));
        }
        if !t.date.trim().is_empty() && !is_valid_date(&t.date) {
            return Err(StoreError::validation(format!(
                "test {:?}: date must be YYYY-MM-DD",
                t.name
            )));
        }
    }
    Ok(())
}

fn validate_attendance(entries: &[AttendanceEntry]) -> StoreResult<()> {
    for a in entries {
        if !is_valid_date(&a.date) {
            return Err(StoreError::validation(format!(
                "attendance date {:?} must be YYYY-MM-DD",
                a.date
            )));
        }
    }
    Ok(())
}

/// Partial update. Fields left as `None` keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentPatch {
    pub name: Option<String>,
    pub password: Option<String>,
    /// An empty string clears the stored email.
    pub email: Option<String>,
    /// An empty string clears the stored phone.
    pub phone: Option<String>,
    #[serde(rename = "class")]
    pub class_label: Option<ClassLabel>,
    pub enrollment_date: Option<String>,
    pub tests: Option<Vec<TestEntry>>,
    pub attendance: Option<Vec<AttendanceEntry>>,
}

impl StudentPatch {
    pub fn validate(&self) -> StoreResult<()> {
        if matches!(&self.name, Some(n) if n.trim().is_empty()) {
            return Err(StoreError::validation("name must not be empty"));
        }
        if let Some(d) = &self.enrollment_date {
            if !d.trim().is_empty() && !is_valid_date(d) {
                return Err(StoreError::validation("enrollmentDate must be YYYY-MM-DD"));
            }
        }
        if let Some(tests) = &self.tests {
            validate_tests(tests)?;
        }
        if let Some(attendance) = &self.attendance {
            validate_attendance(attendance)?;
        }
        Ok(())
    }

    /// A blank password in the patch keeps the stored one.
    pub fn apply_to(&self, student: &mut Student) {
        if let Some(name) = &self.name {
            student.name = name.trim().to_string();
        }
        if let Some(password) = self.password.clone().and_then(non_empty) {
            student.password = Some(password);
        }
        if let Some(email) = &self.email {
            student.email = non_empty(email.clone());
        }
        if let Some(phone) = &self.phone {
            student.phone = non_empty(phone.clone());
        }
        if let Some(class_label) = self.class_label {
            student.class_label = class_label;
        }
        if let Some(date) = &self.enrollment_date {
            student.enrollment_date = date.trim().to_string();
        }
        if let Some(tests) = &self.tests {
            student.tests = tests.clone();
        }
        if let Some(attendance) = &self.attendance {
            student.attendance = attendance.clone();
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_student(id: &str, name: &str, password: &str) -> Student {
    Student {
        id: id.to_string(),
        name: name.to_string(),
        password: (!password.is_empty()).then(|| password.to_string()),
        email: None,
        phone: None,
        class_label: ClassLabel::Class10,
        enrollment_date: "2024-06-01".to_string(),
        tests: vec![TestEntry {
            name: "Unit 1".to_string(),
            date: "2024-07-01".to_string(),
            marks: 42,
            total: 50,
        }],
        attendance: vec![
            AttendanceEntry {
                date: "2024-07-01".to_string(),
                status: AttendanceStatus::Present,
            },
            AttendanceEntry {
                date: "2024-07-02".to_string(),
                status: AttendanceStatus::Absent,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::row_to_record;

    #[test]
    fn class_label_parses_leniently() {
        assert_eq!("Class 10".parse::<ClassLabel>(), Ok(ClassLabel::Class10));
        assert_eq!(" class8 ".parse::<ClassLabel>(), Ok(ClassLabel::Class8));
        assert_eq!("9".parse::<ClassLabel>(), Ok(ClassLabel::Class9));
        assert!("Class 11".parse::<ClassLabel>().is_err());
        assert_eq!(ClassLabel::ALL.len(), 3);
    }

    #[test]
    fn attendance_percentage_is_derived() {
        let mut s = sample_student("S1", "A", "p");
        assert_eq!(s.attendance_percentage(), 50.0);
        s.attendance.clear();
        assert_eq!(s.attendance_percentage(), 0.0);
    }

    #[test]
    fn progress_tracks_attendance() {
        let mut s = sample_student("S1", "A", "p");
        assert_eq!(
            s.progress(),
            Progress {
                completion: 50.0,
                status: "In Progress"
            }
        );
        s.attendance.clear();
        assert_eq!(s.progress().status, "New");
        assert_eq!(s.progress().completion, 0.0);
        assert_eq!(s.to_record()["progress"], json!({ "completion": 0.0, "status": "New" }));
    }

    #[test]
    fn mark_attendance_replaces_same_date() {
        let mut s = sample_student("S1", "A", "p");
        s.mark_attendance("2024-07-02", AttendanceStatus::Present);
        s.mark_attendance("2024-07-03", AttendanceStatus::Absent);
        assert_eq!(s.attendance.len(), 3);
        assert_eq!(s.attendance[1].status, AttendanceStatus::Present);
        assert_eq!(s.attendance[2].date, "2024-07-03");
    }

    #[test]
    fn record_test_replaces_same_name_and_date() {
        let mut s = sample_student("S1", "A", "p");
        s.record_test(TestEntry {
            name: "unit 1".into(),
            date: "2024-07-01".into(),
            marks: 48,
            total: 50,
        });
        assert_eq!(s.tests.len(), 1);
        assert_eq!(s.tests[0].marks, 48);
    }

    #[test]
    fn from_record_reads_sheet_style_rows() {
        let headers = [
            "id",
            "name",
            "password",
            "email",
            "phone",
            "student_class",
            "enrollment_date",
            "tests_json",
            "attendance_log_json",
        ];
        let values = [
            "STU001",
            "Rahul Kumar",
            "rahul123",
            "",
            "",
            "Class 10",
            "2024-06-01",
            r#"[{"name":"Unit 1","date":"2024-07-01","marks":"42","total":50}]"#,
            r#"[{"date":"2024-07-01","status":"present"},{"date":"","status":"Absent"}]"#,
        ];
        let rec = row_to_record(&headers, &values);
        let s = Student::from_record(&rec).expect("student");
        assert_eq!(s.id, "STU001");
        assert_eq!(s.email, None);
        assert_eq!(s.password.as_deref(), Some("rahul123"));
        assert_eq!(s.class_label, ClassLabel::Class10);
        assert_eq!(s.tests[0].marks, 42);
        assert_eq!(s.attendance.len(), 1);
    }

    #[test]
    fn from_record_requires_id_and_class() {
        let rec = row_to_record(&["id", "name"], &["", "x"]);
        assert!(Student::from_record(&rec).is_err());
        let rec = row_to_record(&["id", "student_class"], &["S1", "Class 42"]);
        assert!(matches!(
            Student::from_record(&rec),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn record_round_trips_through_rows() {
        let s = sample_student("S1", "Asha", "pw");
        let rec = s.to_record();
        let rebuilt = Student::from_record(&rec).expect("student");
        assert_eq!(rebuilt, s);
    }

    #[test]
    fn empty_patch_changes_nothing() {
        let s = sample_student("S1", "Asha", "pw");
        let mut patched = s.clone();
        StudentPatch::default().apply_to(&mut patched);
        assert_eq!(patched, s);
    }

    #[test]
    fn patch_keeps_password_unless_given() {
        let mut s = sample_student("S1", "Asha", "pw");
        let patch = StudentPatch {
            name: Some("Asha R".into()),
            password: Some("  ".into()),
            email: Some("asha@example.com".into()),
            ..Default::default()
        };
        patch.apply_to(&mut s);
        assert_eq!(s.name, "Asha R");
        assert_eq!(s.password.as_deref(), Some("pw"));
        assert_eq!(s.email.as_deref(), Some("asha@example.com"));

        StudentPatch {
            email: Some(String::new()),
            ..Default::default()
        }
        .apply_to(&mut s);
        assert_eq!(s.email, None);
    }

    #[test]
    fn validation_rejects_bad_input() {
        let mut s = sample_student("S1", "Asha", "pw");
        s.attendance[0].date = "01/07/2024".into();
        assert!(s.validate().is_err());

        let patch = StudentPatch {
            name: Some(" ".into()),
            ..Default::default()
        };
        assert!(patch.validate().is_err());
    }

    #[test]
    fn patch_deserializes_from_camel_case() {
        let patch: StudentPatch = serde_json::from_value(json!({
            "class": "Class 9",
            "enrollmentDate": "2024-01-01",
            "attendance": [{ "date": "2024-01-02", "status": "Absent" }],
        }))
        .expect("patch");
        assert_eq!(patch.class_label, Some(ClassLabel::Class9));
        assert_eq!(patch.enrollment_date.as_deref(), Some("2024-01-01"));
        assert_eq!(
            patch.attendance.as_deref().map(|a| a[0].status),
            Some(AttendanceStatus::Absent)
        );
    }
}
