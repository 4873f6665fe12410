//! Backend-agnostic record store used by every request handler.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::credential::{digest_password, is_digest};
use crate::error::{StoreError, StoreResult};
use crate::locks::KeyedLocks;
use crate::model::{is_valid_date, today, AttendanceStatus, Student, StudentPatch, TestEntry};
use crate::normalize::{canonical, canonical_id, keys_match, KeyKind};
use crate::store::Backend;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceMark {
    pub student_id: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub date: String,
    pub updated: Vec<String>,
    /// Display names of the students marked absent.
    pub absentees: Vec<String>,
    pub unknown: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub student_id: String,
    pub name: String,
    pub date: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestBatch {
    pub name: String,
    pub date: String,
    pub total: u32,
    pub marks: Vec<(String, u32)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    pub recorded: Vec<String>,
    pub unknown: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Topper {
    pub student_id: String,
    pub name: String,
}

/// Highest marks for one test (name and date); every student on those marks
/// is listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub test_name: String,
    pub date: String,
    pub marks: u32,
    pub total: u32,
    pub toppers: Vec<Topper>,
}

fn require_date(date: &str) -> StoreResult<String> {
    let date = date.trim();
    if !is_valid_date(date) {
        return Err(StoreError::validation(format!("date {date:?} must be YYYY-MM-DD")));
    }
    Ok(date.to_string())
}

/// Digest a plaintext password; values that are already digests pass through.
fn seal(password: Option<String>) -> Option<String> {
    let password = password?;
    if is_digest(&password) {
        return Some(password);
    }
    digest_password(&password)
}

pub struct RecordStore {
    backend: Box<dyn Backend>,
    locks: KeyedLocks,
}

impl RecordStore {
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            locks: KeyedLocks::new(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn get(&self, id: &str) -> StoreResult<Option<Student>> {
        if canonical_id(id).is_empty() {
            return Ok(None);
        }
        self.backend.get(id)
    }

    pub fn get_all(&self) -> StoreResult<Vec<Student>> {
        self.backend.get_all()
    }

    pub fn add(&self, mut student: Student) -> StoreResult<Student> {
        student.id = student.id.trim().to_string();
        student.name = student.name.trim().to_string();
        if student.enrollment_date.trim().is_empty() {
            student.enrollment_date = today();
        }
        student.validate()?;
        if !is_valid_date(&student.enrollment_date) {
            return Err(StoreError::validation("enrollmentDate must be YYYY-MM-DD"));
        }
        student.password = seal(student.password.take());

        let id = student.id.clone();
        self.locks.with_lock(&id, || self.backend.add(&student))?;
        info!(student_id = %id, backend = self.backend.name(), "student added");
        Ok(student)
    }

    pub fn update(&self, id: &str, mut patch: StudentPatch) -> StoreResult<Student> {
        patch.validate()?;
        if patch.password.as_deref().is_some_and(|p| !canonical(p).is_empty()) {
            patch.password = seal(patch.password.take());
        } else {
            patch.password = None;
        }
        let student = self.locks.with_lock(id, || self.backend.update(id, &patch))?;
        debug!(student_id = %student.id, "student updated");
        Ok(student)
    }

    pub fn delete(&self, id: &str) -> StoreResult<()> {
        if canonical_id(id).is_empty() {
            return Ok(());
        }
        self.locks.with_lock(id, || self.backend.delete(id))?;
        info!(student_id = %id.trim(), "student deleted");
        Ok(())
    }

    pub fn authenticate(&self, login: &str, password: &str) -> StoreResult<Option<Student>> {
        if canonical(login).is_empty() || canonical(password).is_empty() {
            return Ok(None);
        }
        self.backend.authenticate(login, password)
    }

    /// Id of the student a login names, by id first and then by display name.
    pub fn resolve_login(&self, login: &str) -> StoreResult<Option<String>> {
        if canonical(login).is_empty() {
            return Ok(None);
        }
        if let Some(student) = self.backend.get(login)? {
            return Ok(Some(student.id));
        }
        Ok(self
            .backend
            .get_all()?
            .into_iter()
            .find(|s| keys_match(KeyKind::Name, &s.name, login))
            .map(|s| s.id))
    }

    /// Record one status per listed student for `date`, replacing any entry
    /// that date already has. Unknown ids are reported back, not fatal.
    pub fn submit_attendance(&self, date: &str, marks: &[AttendanceMark]) -> StoreResult<AttendanceSummary> {
        let date = require_date(date)?;
        let mut summary = AttendanceSummary {
            date: date.clone(),
            ..AttendanceSummary::default()
        };
        for mark in marks {
            let outcome = self.locks.with_lock(&mark.student_id, || -> StoreResult<Option<Student>> {
                let Some(mut student) = self.backend.get(&mark.student_id)? else {
                    return Ok(None);
                };
                student.mark_attendance(&date, mark.status);
                self.backend.replace(&student)?;
                Ok(Some(student))
            })?;
            match outcome {
                Some(student) => {
                    if mark.status == AttendanceStatus::Absent {
                        summary.absentees.push(student.name);
                    }
                    summary.updated.push(student.id);
                }
                None => summary.unknown.push(mark.student_id.trim().to_string()),
            }
        }
        info!(
            date = %summary.date,
            updated = summary.updated.len(),
            absent = summary.absentees.len(),
            unknown = summary.unknown.len(),
            "attendance submitted"
        );
        Ok(summary)
    }

    /// Mark every student present on `date` except the listed ids.
    pub fn submit_absentees(&self, date: &str, absent_ids: &[String]) -> StoreResult<AttendanceSummary> {
        let date = require_date(date)?;
        let students = self.backend.get_all()?;
        let marks: Vec<AttendanceMark> = students
            .iter()
            .map(|s| {
                let absent = absent_ids
                    .iter()
                    .any(|id| keys_match(KeyKind::Identifier, &s.id, id));
                AttendanceMark {
                    student_id: s.id.clone(),
                    status: if absent {
                        AttendanceStatus::Absent
                    } else {
                        AttendanceStatus::Present
                    },
                }
            })
            .collect();
        let mut summary = self.submit_attendance(&date, &marks)?;
        summary.unknown.extend(
            absent_ids
                .iter()
                .filter(|id| !students.iter().any(|s| keys_match(KeyKind::Identifier, &s.id, id)))
                .map(|id| id.trim().to_string()),
        );
        Ok(summary)
    }

    /// Attendance rows across all students, ordered by date then id.
    pub fn attendance(&self, date: Option<&str>) -> StoreResult<Vec<AttendanceRecord>> {
        let date = date.map(str::trim).filter(|d| !d.is_empty());
        if let Some(d) = date {
            require_date(d)?;
        }
        let mut records: Vec<AttendanceRecord> = self
            .backend
            .get_all()?
            .into_iter()
            .flat_map(|s| {
                s.attendance
                    .into_iter()
                    .filter(|a| date.map_or(true, |d| a.date == d))
                    .map(|a| AttendanceRecord {
                        student_id: s.id.clone(),
                        name: s.name.clone(),
                        date: a.date,
                        status: a.status,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        records.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.student_id.cmp(&b.student_id)));
        Ok(records)
    }

    /// Toppers per test, ordered by date then test name.
    pub fn leaderboard(&self) -> StoreResult<Vec<LeaderboardEntry>> {
        let mut board: BTreeMap<(String, String), LeaderboardEntry> = BTreeMap::new();
        for student in self.backend.get_all()? {
            for test in &student.tests {
                let topper = Topper {
                    student_id: student.id.clone(),
                    name: student.name.clone(),
                };
                let entry = board
                    .entry((test.date.clone(), canonical(&test.name)))
                    .or_insert_with(|| LeaderboardEntry {
                        test_name: test.name.clone(),
                        date: test.date.clone(),
                        marks: test.marks,
                        total: test.total,
                        toppers: Vec::new(),
                    });
                if test.marks > entry.marks {
                    entry.marks = test.marks;
                    entry.total = test.total;
                    entry.toppers.clear();
                }
                if test.marks == entry.marks {
                    entry.toppers.push(topper);
                }
            }
        }
        Ok(board
            .into_values()
            .map(|mut entry| {
                entry.toppers.sort_by(|a, b| a.student_id.cmp(&b.student_id));
                entry
            })
            .collect())
    }

    /// Record one test for many students. An entry with the same test name and
    /// date is overwritten.
    pub fn record_tests(&self, batch: &TestBatch) -> StoreResult<TestSummary> {
        let name = batch.name.trim();
        if name.is_empty() {
            return Err(StoreError::validation("missing testName"));
        }
        let date = require_date(&batch.date)?;
        if batch.total == 0 {
            return Err(StoreError::validation("total must be positive"));
        }
        if let Some((id, marks)) = batch.marks.iter().find(|(_, m)| *m > batch.total) {
            return Err(StoreError::validation(format!(
                "marks {marks} for {id} exceed total {}",
                batch.total
            )));
        }

        let mut summary = TestSummary::default();
        for (id, marks) in &batch.marks {
            let recorded = self.locks.with_lock(id, || -> StoreResult<Option<String>> {
                let Some(mut student) = self.backend.get(id)? else {
                    return Ok(None);
                };
                student.record_test(TestEntry {
                    name: name.to_string(),
                    date: date.clone(),
                    marks: *marks,
                    total: batch.total,
                });
                self.backend.replace(&student)?;
                Ok(Some(student.id))
            })?;
            match recorded {
                Some(id) => summary.recorded.push(id),
                None => summary.unknown.push(id.trim().to_string()),
            }
        }
        info!(
            test = name,
            date = %date,
            recorded = summary.recorded.len(),
            unknown = summary.unknown.len(),
            "test results recorded"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{sample_student, ClassLabel};
    use crate::store::MemoryBackend;

    fn store() -> RecordStore {
        RecordStore::new(Box::new(MemoryBackend::new()))
    }

    fn rahul() -> Student {
        Student {
            id: "STU001".into(),
            name: "Rahul Kumar".into(),
            password: Some("rahul123".into()),
            email: None,
            phone: None,
            class_label: ClassLabel::Class10,
            enrollment_date: String::new(),
            tests: Vec::new(),
            attendance: Vec::new(),
        }
    }

    #[test]
    fn rahul_end_to_end() {
        let s = store();
        let added = s.add(rahul()).expect("add");
        assert!(is_digest(added.password.as_deref().expect("password")));
        assert_eq!(added.enrollment_date, today());

        assert_eq!(s.get("stu001").expect("get"), Some(added.clone()));
        for (login, pw) in [("STU001", "rahul123"), ("stu001", " rahul123 "), ("Rahul Kumar", "RAHUL123")] {
            let found = s.authenticate(login, pw).expect("auth").expect("match");
            assert_eq!(found.id, "STU001");
            assert_eq!(found.password, None);
        }
        assert!(s.authenticate("STU001", "wrong").expect("auth").is_none());
        assert!(s.authenticate("", "").expect("auth").is_none());
    }

    #[test]
    fn resolve_login_by_id_or_name() {
        let s = store();
        s.add(rahul()).expect("add");
        assert_eq!(s.resolve_login("stuoo1").expect("id"), Some("STU001".into()));
        assert_eq!(s.resolve_login("rahul kumar").expect("name"), Some("STU001".into()));
        assert_eq!(s.resolve_login("nobody").expect("miss"), None);
        assert_eq!(s.resolve_login("  ").expect("blank"), None);
    }

    #[test]
    fn empty_patch_leaves_record_unchanged() {
        let s = store();
        let added = s.add(sample_student("S1", "Asha", "pw")).expect("add");
        s.update("S1", StudentPatch::default()).expect("update");
        assert_eq!(s.get("S1").expect("get"), Some(added));
    }

    #[test]
    fn update_seals_new_password_and_keeps_old_on_blank() {
        let s = store();
        s.add(sample_student("S1", "Asha", "old")).expect("add");
        let patch = StudentPatch {
            password: Some("new".into()),
            ..StudentPatch::default()
        };
        let updated = s.update("s1", patch).expect("update");
        assert!(is_digest(updated.password.as_deref().expect("password")));
        assert!(s.authenticate("S1", "new").expect("auth").is_some());

        let blank = StudentPatch {
            password: Some("  ".into()),
            ..StudentPatch::default()
        };
        s.update("S1", blank).expect("update");
        assert!(s.authenticate("S1", "new").expect("auth").is_some());

        assert!(matches!(
            s.update("missing", StudentPatch::default()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn delete_is_idempotent() {
        let s = store();
        s.add(sample_student("S1", "Asha", "pw")).expect("add");
        s.delete("S1").expect("delete");
        assert_eq!(s.get("S1").expect("get"), None);
        s.delete("never-existed").expect("delete missing");
    }

    #[test]
    fn add_rejects_bad_input_and_duplicates() {
        let s = store();
        let mut no_name = sample_student("S1", " ", "pw");
        assert!(matches!(s.add(no_name.clone()), Err(StoreError::Validation(_))));
        no_name.name = "Asha".into();
        no_name.enrollment_date = "01/06/2024".into();
        assert!(matches!(s.add(no_name), Err(StoreError::Validation(_))));

        s.add(sample_student("STU001", "A", "pw")).expect("add");
        assert!(matches!(
            s.add(sample_student(" stu001", "B", "pw")),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn attendance_replaces_same_date_and_reports_unknown() {
        let s = store();
        s.add(sample_student("S1", "Asha", "pw")).expect("add");
        s.add(sample_student("S2", "Ravi", "pw")).expect("add");

        let marks = vec![
            AttendanceMark {
                student_id: "s1".into(),
                status: AttendanceStatus::Absent,
            },
            AttendanceMark {
                student_id: "S2".into(),
                status: AttendanceStatus::Present,
            },
            AttendanceMark {
                student_id: "S9".into(),
                status: AttendanceStatus::Present,
            },
        ];
        let summary = s.submit_attendance("2024-07-01", &marks).expect("submit");
        assert_eq!(summary.updated, vec!["S1", "S2"]);
        assert_eq!(summary.absentees, vec!["Asha"]);
        assert_eq!(summary.unknown, vec!["S9"]);

        let s1 = s.get("S1").expect("get").expect("present");
        assert_eq!(s1.attendance.len(), 2);
        assert_eq!(s1.attendance[0].status, AttendanceStatus::Absent);
        assert_eq!(s1.attendance_percentage(), 0.0);

        assert!(matches!(
            s.submit_attendance("July 1", &marks),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn absentee_flow_marks_everyone_else_present() {
        let s = store();
        for (id, name) in [("S1", "Asha"), ("S2", "Ravi"), ("S3", "Meera")] {
            s.add(sample_student(id, name, "pw")).expect("add");
        }
        let summary = s
            .submit_absentees("2024-08-01", &["s2".to_string(), "S7".to_string()])
            .expect("submit");
        assert_eq!(summary.updated.len(), 3);
        assert_eq!(summary.absentees, vec!["Ravi"]);
        assert_eq!(summary.unknown, vec!["S7"]);

        let day = s.attendance(Some("2024-08-01")).expect("attendance");
        let statuses: Vec<_> = day.iter().map(|r| (r.student_id.as_str(), r.status)).collect();
        assert_eq!(
            statuses,
            vec![
                ("S1", AttendanceStatus::Present),
                ("S2", AttendanceStatus::Absent),
                ("S3", AttendanceStatus::Present),
            ]
        );
        assert_eq!(s.attendance(None).expect("all").len(), 3 * 3);
    }

    #[test]
    fn leaderboard_keeps_ties_per_test() {
        let s = store();
        for (id, name) in [("S1", "Asha"), ("S2", "Ravi"), ("S3", "Meera")] {
            let mut student = sample_student(id, name, "pw");
            student.tests.clear();
            s.add(student).expect("add");
        }
        let unit1 = TestBatch {
            name: "Unit 1".into(),
            date: "2024-07-01".into(),
            total: 50,
            marks: vec![("S3".into(), 47), ("S1".into(), 47), ("S2".into(), 30)],
        };
        let unit2 = TestBatch {
            name: "Unit 2".into(),
            date: "2024-06-15".into(),
            total: 20,
            marks: vec![("S2".into(), 18), ("S1".into(), 12)],
        };
        s.record_tests(&unit1).expect("record");
        s.record_tests(&unit2).expect("record");

        let board = s.leaderboard().expect("leaderboard");
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].test_name, "Unit 2");
        assert_eq!(board[0].marks, 18);
        assert_eq!(board[0].toppers.len(), 1);
        assert_eq!(board[0].toppers[0].name, "Ravi");

        assert_eq!(board[1].total, 50);
        let ids: Vec<_> = board[1].toppers.iter().map(|t| t.student_id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S3"]);
        assert!(store().leaderboard().expect("empty").is_empty());
    }

    #[test]
    fn test_batch_overwrites_same_name_and_date() {
        let s = store();
        s.add(sample_student("S1", "Asha", "pw")).expect("add");
        let mut batch = TestBatch {
            name: "Unit 1".into(),
            date: "2024-07-01".into(),
            total: 50,
            marks: vec![("s1".into(), 45), ("S9".into(), 10)],
        };
        let summary = s.record_tests(&batch).expect("record");
        assert_eq!(summary.recorded, vec!["S1"]);
        assert_eq!(summary.unknown, vec!["S9"]);

        let tests = s.get("S1").expect("get").expect("present").tests;
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].marks, 45);

        batch.marks = vec![("S1".into(), 60)];
        assert!(matches!(s.record_tests(&batch), Err(StoreError::Validation(_))));
    }
}
