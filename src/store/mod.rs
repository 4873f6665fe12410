//! Storage backends for student records.
//!
//! Every medium (memory, JSON file, SQLite, spreadsheet API, script proxy)
//! implements [`Backend`]; the one selected by configuration is wrapped in a
//! [`RecordStore`](crate::roster::RecordStore) by the caller.

mod fallback;
mod file;
mod memory;
mod script;
mod sheets;
mod sql;

pub use fallback::FallbackBackend;
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use script::ScriptBackend;
pub use sheets::{HttpSheetClient, SheetsBackend};
pub use sql::SqlBackend;

use anyhow::Context;
use tracing::{info, warn};

use crate::config::{BackendConfig, BackendKind};
use crate::credential::verify_password;
use crate::error::{StoreError, StoreResult};
use crate::model::{Student, StudentPatch};
use crate::normalize::{keys_match, KeyKind};

pub const FILE_NAME: &str = "students.json";
pub const DB_FILE_NAME: &str = "roster.sqlite3";

pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Normalized lookup. A missing record is `Ok(None)`.
    fn get(&self, id: &str) -> StoreResult<Option<Student>>;

    fn get_all(&self) -> StoreResult<Vec<Student>>;

    /// Insert a new record; an existing normalized id is a `Conflict`.
    fn add(&self, student: &Student) -> StoreResult<()>;

    /// Overwrite the record with the same normalized id; `NotFound` if absent.
    fn replace(&self, student: &Student) -> StoreResult<()>;

    /// Remove a record. Removing a missing id succeeds.
    fn delete(&self, id: &str) -> StoreResult<()>;

    fn update(&self, id: &str, patch: &StudentPatch) -> StoreResult<Student> {
        let mut student = self
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(id.trim().to_string()))?;
        patch.apply_to(&mut student);
        self.replace(&student)?;
        Ok(student)
    }

    /// Resolve a login (id or display name) and check the password. The
    /// returned record never carries the password.
    fn authenticate(&self, login: &str, password: &str) -> StoreResult<Option<Student>> {
        let students = self.get_all()?;
        Ok(find_login(&students, login, password)
            .cloned()
            .map(Student::without_password))
    }
}

pub fn find_login<'a>(students: &'a [Student], login: &str, password: &str) -> Option<&'a Student> {
    students.iter().find(|s| {
        let login_matches =
            keys_match(KeyKind::Identifier, &s.id, login) || keys_match(KeyKind::Name, &s.name, login);
        login_matches
            && s
                .password
                .as_deref()
                .is_some_and(|stored| verify_password(stored, password))
    })
}

fn open_kind(kind: BackendKind, cfg: &BackendConfig) -> anyhow::Result<Box<dyn Backend>> {
    let backend: Box<dyn Backend> = match kind {
        BackendKind::Memory => Box::new(MemoryBackend::new()),
        BackendKind::File => Box::new(FileBackend::open(&cfg.data_dir.join(FILE_NAME))?),
        BackendKind::Sql => Box::new(SqlBackend::open(&cfg.data_dir.join(DB_FILE_NAME))?),
        BackendKind::Sheets => {
            let id = cfg.sheets_id.as_deref().context("missing sheets id")?;
            let token = cfg.sheets_token.as_deref().context("missing sheets token")?;
            let client = HttpSheetClient::new(&cfg.sheets_endpoint, id, token, cfg.http_timeout)?;
            Box::new(SheetsBackend::open(client)?)
        }
        BackendKind::Script => {
            let url = cfg.script_url.as_deref().context("missing script url")?;
            Box::new(ScriptBackend::new(url, cfg.http_timeout)?)
        }
    };
    Ok(backend)
}

/// Build the configured backend, wrapping it with the fallback when one is
/// configured. A primary that cannot even be opened leaves the fallback alone.
pub fn open_backend(cfg: &BackendConfig) -> anyhow::Result<Box<dyn Backend>> {
    cfg.validate()?;
    let primary = open_kind(cfg.kind, cfg);
    let Some(fallback_kind) = cfg.fallback else {
        let backend = primary?;
        info!(backend = backend.name(), "store opened");
        return Ok(backend);
    };

    let secondary = open_kind(fallback_kind, cfg)
        .with_context(|| format!("failed to open fallback backend {}", fallback_kind.as_str()))?;
    match primary {
        Ok(primary) => {
            info!(
                backend = primary.name(),
                fallback = secondary.name(),
                "store opened with fallback"
            );
            Ok(Box::new(FallbackBackend::new(primary, secondary)))
        }
        Err(e) => {
            warn!(
                backend = cfg.kind.as_str(),
                fallback = secondary.name(),
                error = %format!("{e:#}"),
                "primary backend failed to open, serving from fallback"
            );
            Ok(secondary)
        }
    }
}
