use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use tracing::{debug, warn};

use super::memory::{insert_new, lookup, remove, replace_existing, RecordMap};
use super::Backend;
use crate::error::{StoreError, StoreResult};
use crate::model::Student;
use crate::normalize::canonical_id;

const BACKEND: &str = "file";

/// One JSON document mapping identifier to record, rewritten in full on every
/// mutation.
pub struct FileBackend {
    path: PathBuf,
    records: Mutex<RecordMap>,
}

impl FileBackend {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
        }
        let records = if path.is_file() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
            parse_document(&text)
                .with_context(|| format!("{} is not a valid student document", path.to_string_lossy()))?
        } else {
            RecordMap::new()
        };
        debug!(path = %path.to_string_lossy(), students = records.len(), "student file loaded");
        Ok(Self {
            path: path.to_path_buf(),
            records: Mutex::new(records),
        })
    }

    fn records(&self) -> MutexGuard<'_, RecordMap> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, records: &RecordMap) -> StoreResult<()> {
        let document: BTreeMap<&str, &Student> =
            records.values().map(|s| (s.id.as_str(), s)).collect();
        let bytes =
            serde_json::to_vec_pretty(&document).map_err(|e| StoreError::unavailable(BACKEND, e))?;

        let tmp = self.path.with_extension("json.writing");
        std::fs::write(&tmp, bytes).map_err(|e| StoreError::unavailable(BACKEND, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StoreError::unavailable(BACKEND, e))
    }

    /// Apply a change to a copy, write it out, then commit it in memory.
    fn mutate<T>(&self, f: impl FnOnce(&mut RecordMap) -> StoreResult<T>) -> StoreResult<T> {
        let mut records = self.records();
        let mut next = records.clone();
        let out = f(&mut next)?;
        self.persist(&next)?;
        *records = next;
        Ok(out)
    }
}

fn parse_document(text: &str) -> anyhow::Result<RecordMap> {
    if text.trim().is_empty() {
        return Ok(RecordMap::new());
    }
    let document: BTreeMap<String, Student> = serde_json::from_str(text)?;
    let mut records = RecordMap::new();
    for (doc_key, mut student) in document {
        if student.id.trim().is_empty() {
            student.id = doc_key;
        }
        let key = canonical_id(&student.id);
        if key.is_empty() {
            warn!("skipping student without an id");
            continue;
        }
        if records.contains_key(&key) {
            warn!(student_id = %student.id, "duplicate normalized id in student file, keeping first");
            continue;
        }
        records.insert(key, student);
    }
    Ok(records)
}

impl Backend for FileBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn get(&self, id: &str) -> StoreResult<Option<Student>> {
        Ok(lookup(&self.records(), id))
    }

    fn get_all(&self) -> StoreResult<Vec<Student>> {
        Ok(self.records().values().cloned().collect())
    }

    fn add(&self, student: &Student) -> StoreResult<()> {
        self.mutate(|records| insert_new(records, student))
    }

    fn replace(&self, student: &Student) -> StoreResult<()> {
        self.mutate(|records| replace_existing(records, student))
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        if lookup(&self.records(), id).is_none() {
            return Ok(());
        }
        self.mutate(|records| {
            remove(records, id);
            Ok(())
        })
    }
}
