use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::warn;

use super::Backend;
use crate::error::{StoreError, StoreResult};
use crate::model::{AttendanceEntry, AttendanceStatus, ClassLabel, Student, TestEntry};
use crate::normalize::canonical_id;

const BACKEND: &str = "sql";

const STUDENT_COLUMNS: &str = "id, name, password, email, phone, class_label, enrollment_date";

pub struct SqlBackend {
    conn: Mutex<Connection>,
}

impl SqlBackend {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS students(
                id TEXT PRIMARY KEY,
                id_key TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                password TEXT,
                email TEXT,
                phone TEXT,
                class_label TEXT NOT NULL,
                enrollment_date TEXT NOT NULL,
                updated_at TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS student_tests(
                student_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                name TEXT NOT NULL,
                date TEXT NOT NULL,
                marks INTEGER NOT NULL,
                total INTEGER NOT NULL,
                PRIMARY KEY(student_id, seq),
                FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS student_attendance(
                student_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                date TEXT NOT NULL,
                status TEXT NOT NULL,
                PRIMARY KEY(student_id, seq),
                FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_student_attendance_date ON student_attendance(date)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sql_err(e: rusqlite::Error) -> StoreError {
    StoreError::unavailable(BACKEND, e)
}

struct StudentRow {
    id: String,
    name: String,
    password: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    class_label: String,
    enrollment_date: String,
}

fn student_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: row.get(0)?,
        name: row.get(1)?,
        password: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        class_label: row.get(5)?,
        enrollment_date: row.get(6)?,
    })
}

fn hydrate(conn: &Connection, row: StudentRow) -> StoreResult<Student> {
    let class_label = row
        .class_label
        .parse::<ClassLabel>()
        .map_err(|e| StoreError::unavailable(BACKEND, format!("student {}: {e}", row.id)))?;

    let mut stmt = conn
        .prepare("SELECT name, date, marks, total FROM student_tests WHERE student_id = ? ORDER BY seq")
        .map_err(sql_err)?;
    let tests = stmt
        .query_map([&row.id], |r| {
            Ok(TestEntry {
                name: r.get(0)?,
                date: r.get(1)?,
                marks: r.get(2)?,
                total: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(sql_err)?;

    let mut stmt = conn
        .prepare("SELECT date, status FROM student_attendance WHERE student_id = ? ORDER BY seq")
        .map_err(sql_err)?;
    let raw_attendance = stmt
        .query_map([&row.id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(sql_err)?;
    let attendance = raw_attendance
        .into_iter()
        .filter_map(|(date, status)| match status.parse::<AttendanceStatus>() {
            Ok(status) => Some(AttendanceEntry { date, status }),
            Err(e) => {
                warn!(student_id = %row.id, error = %e, "skipping stored attendance row");
                None
            }
        })
        .collect();

    Ok(Student {
        id: row.id,
        name: row.name,
        password: row.password,
        email: row.email,
        phone: row.phone,
        class_label,
        enrollment_date: row.enrollment_date,
        tests,
        attendance,
    })
}

fn existing_id(tx: &Transaction<'_>, key: &str) -> StoreResult<Option<String>> {
    tx.query_row("SELECT id FROM students WHERE id_key = ?", [key], |r| r.get(0))
        .optional()
        .map_err(sql_err)
}

fn write_children(tx: &Transaction<'_>, id: &str, student: &Student) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM student_tests WHERE student_id = ?", [id])?;
    tx.execute("DELETE FROM student_attendance WHERE student_id = ?", [id])?;
    for (seq, t) in student.tests.iter().enumerate() {
        tx.execute(
            "INSERT INTO student_tests(student_id, seq, name, date, marks, total)
             VALUES(?, ?, ?, ?, ?, ?)",
            params![id, seq as i64, t.name, t.date, t.marks, t.total],
        )?;
    }
    for (seq, a) in student.attendance.iter().enumerate() {
        tx.execute(
            "INSERT INTO student_attendance(student_id, seq, date, status) VALUES(?, ?, ?, ?)",
            params![id, seq as i64, a.date, a.status.as_str()],
        )?;
    }
    Ok(())
}

fn non_empty_key(id: &str) -> StoreResult<String> {
    let key = canonical_id(id);
    if key.is_empty() {
        return Err(StoreError::validation("missing id"));
    }
    Ok(key)
}

impl Backend for SqlBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn get(&self, id: &str) -> StoreResult<Option<Student>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id_key = ?"),
                [canonical_id(id)],
                student_row,
            )
            .optional()
            .map_err(sql_err)?;
        row.map(|row| hydrate(&conn, row)).transpose()
    }

    fn get_all(&self) -> StoreResult<Vec<Student>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT {STUDENT_COLUMNS} FROM students ORDER BY id_key"))
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([], student_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(sql_err)?;
        rows.into_iter().map(|row| hydrate(&conn, row)).collect()
    }

    fn add(&self, student: &Student) -> StoreResult<()> {
        let key = non_empty_key(&student.id)?;
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(sql_err)?;
        if let Some(existing) = existing_id(&tx, &key)? {
            return Err(StoreError::Conflict(existing));
        }
        tx.execute(
            "INSERT INTO students(id, id_key, name, password, email, phone, class_label, enrollment_date, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                student.id,
                key,
                student.name,
                student.password,
                student.email,
                student.phone,
                student.class_label.as_str(),
                student.enrollment_date,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .map_err(sql_err)?;
        write_children(&tx, &student.id, student).map_err(sql_err)?;
        tx.commit().map_err(sql_err)
    }

    fn replace(&self, student: &Student) -> StoreResult<()> {
        let key = non_empty_key(&student.id)?;
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(sql_err)?;
        let Some(id) = existing_id(&tx, &key)? else {
            return Err(StoreError::NotFound(student.id.clone()));
        };
        tx.execute(
            "UPDATE students
             SET name = ?, password = ?, email = ?, phone = ?, class_label = ?, enrollment_date = ?, updated_at = ?
             WHERE id = ?",
            params![
                student.name,
                student.password,
                student.email,
                student.phone,
                student.class_label.as_str(),
                student.enrollment_date,
                chrono::Utc::now().to_rfc3339(),
                id,
            ],
        )
        .map_err(sql_err)?;
        write_children(&tx, &id, student).map_err(sql_err)?;
        tx.commit().map_err(sql_err)
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        self.conn()
            .execute("DELETE FROM students WHERE id_key = ?", [canonical_id(id)])
            .map_err(sql_err)?;
        Ok(())
    }
}
