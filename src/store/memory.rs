use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::Backend;
use crate::error::{StoreError, StoreResult};
use crate::model::Student;
use crate::normalize::canonical_id;

/// Records keyed by normalized identifier.
pub(super) type RecordMap = BTreeMap<String, Student>;

fn key_for(id: &str) -> StoreResult<String> {
    let key = canonical_id(id);
    if key.is_empty() {
        return Err(StoreError::validation("missing id"));
    }
    Ok(key)
}

pub(super) fn insert_new(map: &mut RecordMap, student: &Student) -> StoreResult<()> {
    let key = key_for(&student.id)?;
    if let Some(existing) = map.get(&key) {
        return Err(StoreError::Conflict(existing.id.clone()));
    }
    map.insert(key, student.clone());
    Ok(())
}

pub(super) fn replace_existing(map: &mut RecordMap, student: &Student) -> StoreResult<()> {
    let key = key_for(&student.id)?;
    let Some(slot) = map.get_mut(&key) else {
        return Err(StoreError::NotFound(student.id.clone()));
    };
    // Keep the identifier spelling the record was created with.
    let id = slot.id.clone();
    *slot = Student {
        id,
        ..student.clone()
    };
    Ok(())
}

pub(super) fn remove(map: &mut RecordMap, id: &str) -> bool {
    map.remove(&canonical_id(id)).is_some()
}

pub(super) fn lookup(map: &RecordMap, id: &str) -> Option<Student> {
    map.get(&canonical_id(id)).cloned()
}

#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<RecordMap>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, RecordMap> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, id: &str) -> StoreResult<Option<Student>> {
        Ok(lookup(&self.records(), id))
    }

    fn get_all(&self) -> StoreResult<Vec<Student>> {
        Ok(self.records().values().cloned().collect())
    }

    fn add(&self, student: &Student) -> StoreResult<()> {
        insert_new(&mut self.records(), student)
    }

    fn replace(&self, student: &Student) -> StoreResult<()> {
        replace_existing(&mut self.records(), student)
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        remove(&mut self.records(), id);
        Ok(())
    }
}
