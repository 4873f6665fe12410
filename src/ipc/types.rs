use serde::{Deserialize, Serialize};

use crate::auth::Authenticator;
use crate::config::Config;
use crate::model::{AttendanceEntry, ClassLabel, Progress, Student, TestEntry};
use crate::roster::RecordStore;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: Config,
    pub store: Option<RecordStore>,
    pub auth: Authenticator,
}

impl AppState {
    pub fn new(config: Config, store: Option<RecordStore>) -> Self {
        let auth = Authenticator::new(&config.login);
        Self {
            config,
            store,
            auth,
        }
    }
}

/// Outbound form of a student: never carries the password, always carries the
/// derived attendance percentage.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentView {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(rename = "class")]
    pub class_label: ClassLabel,
    pub enrollment_date: String,
    pub tests: Vec<TestEntry>,
    pub attendance: Vec<AttendanceEntry>,
    pub attendance_percentage: f64,
    pub progress: Progress,
}

impl From<&Student> for StudentView {
    fn from(s: &Student) -> Self {
        Self {
            id: s.id.clone(),
            name: s.name.clone(),
            email: s.email.clone(),
            phone: s.phone.clone(),
            class_label: s.class_label,
            enrollment_date: s.enrollment_date.clone(),
            tests: s.tests.clone(),
            attendance: s.attendance.clone(),
            attendance_percentage: s.attendance_percentage(),
            progress: s.progress(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::sample_student;

    #[test]
    fn view_hides_password_and_adds_percentage() {
        let v = serde_json::to_value(StudentView::from(&sample_student("S1", "Asha", "pw")))
            .expect("json");
        assert!(v.get("password").is_none());
        assert_eq!(v["attendancePercentage"], 50.0);
        assert_eq!(v["class"], "Class 10");
        assert_eq!(v["enrollmentDate"], "2024-06-01");
        assert_eq!(v["progress"]["completion"], 50.0);
        assert_eq!(v["progress"]["status"], "In Progress");
    }
}
