use tracing::warn;

use super::Backend;
use crate::error::StoreResult;
use crate::model::{Student, StudentPatch};

/// Serve from `primary`, retrying any operation that finds it unreachable on
/// `secondary`. Errors other than unavailability are final.
pub struct FallbackBackend {
    primary: Box<dyn Backend>,
    secondary: Box<dyn Backend>,
}

impl FallbackBackend {
    pub fn new(primary: Box<dyn Backend>, secondary: Box<dyn Backend>) -> Self {
        Self { primary, secondary }
    }

    fn attempt<T>(&self, op: &str, f: impl Fn(&dyn Backend) -> StoreResult<T>) -> StoreResult<T> {
        match f(self.primary.as_ref()) {
            Err(e) if e.is_unavailable() => {
                warn!(
                    op,
                    primary = self.primary.name(),
                    fallback = self.secondary.name(),
                    error = %e,
                    "primary backend unavailable, using fallback"
                );
                f(self.secondary.as_ref())
            }
            other => other,
        }
    }
}

impl Backend for FallbackBackend {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn get(&self, id: &str) -> StoreResult<Option<Student>> {
        self.attempt("get", |b| b.get(id))
    }

    fn get_all(&self) -> StoreResult<Vec<Student>> {
        self.attempt("get_all", |b| b.get_all())
    }

    fn add(&self, student: &Student) -> StoreResult<()> {
        self.attempt("add", |b| b.add(student))
    }

    fn replace(&self, student: &Student) -> StoreResult<()> {
        self.attempt("replace", |b| b.replace(student))
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        self.attempt("delete", |b| b.delete(id))
    }

    fn update(&self, id: &str, patch: &StudentPatch) -> StoreResult<Student> {
        self.attempt("update", |b| b.update(id, patch))
    }

    fn authenticate(&self, login: &str, password: &str) -> StoreResult<Option<Student>> {
        self.attempt("authenticate", |b| b.authenticate(login, password))
    }
}
