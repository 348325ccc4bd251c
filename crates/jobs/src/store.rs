//! Job record persistence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use courier_core::JobId;

use crate::types::JobRecord;

/// Persistence error shared by the job store and the key-value store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Durable home of non-terminal job records.
pub trait JobStore: Send + Sync {
    fn insert(&self, record: &JobRecord) -> Result<(), StoreError>;

    fn update(&self, record: &JobRecord) -> Result<(), StoreError>;

    /// Removing an unknown id is not an error.
    fn remove(&self, id: JobId) -> Result<(), StoreError>;

    fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Every stored record, in enqueue order.
    fn load_all(&self) -> Result<Vec<JobRecord>, StoreError>;
}

impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    fn insert(&self, record: &JobRecord) -> Result<(), StoreError> {
        (**self).insert(record)
    }

    fn update(&self, record: &JobRecord) -> Result<(), StoreError> {
        (**self).update(record)
    }

    fn remove(&self, id: JobId) -> Result<(), StoreError> {
        (**self).remove(id)
    }

    fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        (**self).get(id)
    }

    fn load_all(&self) -> Result<Vec<JobRecord>, StoreError> {
        (**self).load_all()
    }
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, record: &JobRecord) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        if jobs.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        jobs.insert(record.id, record.clone());
        Ok(())
    }

    fn update(&self, record: &JobRecord) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        match jobs.get_mut(&record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.id)),
        }
    }

    fn remove(&self, id: JobId) -> Result<(), StoreError> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner()).remove(&id);
        Ok(())
    }

    fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.jobs.read().unwrap_or_else(|e| e.into_inner()).get(&id).cloned())
    }

    fn load_all(&self) -> Result<Vec<JobRecord>, StoreError> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<_> = jobs.values().cloned().collect();
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }
}
