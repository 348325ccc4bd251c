//! Durable key-value store for process-wide flags and counters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::store::StoreError;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    fn put(&self, key: &str, value: Value) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Atomic read-modify-write. Returning `None` deletes the key.
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<Value>) -> Option<Value>,
    ) -> Result<Option<Value>, StoreError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        (**self).put(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<Value>) -> Option<Value>,
    ) -> Result<Option<Value>, StoreError> {
        (**self).update(key, f)
    }
}

/// Typed helpers over any [`KeyValueStore`].
pub trait KeyValueStoreExt: KeyValueStore {
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn put_as<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.put(key, serde_json::to_value(value)?)
    }

    fn get_bool(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get_as::<bool>(key)?.unwrap_or(false))
    }

    /// Atomically add `by` to an integer counter (missing counts as zero).
    fn increment(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        let updated = self.update(key, &mut |current| {
            let n = current.and_then(|v| v.as_i64()).unwrap_or(0);
            Some(Value::from(n.saturating_add(by)))
        })?;
        Ok(updated.and_then(|v| v.as_i64()).unwrap_or(0))
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}

#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    values: Mutex<HashMap<String, Value>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<Value>) -> Option<Value>,
    ) -> Result<Option<Value>, StoreError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        let next = f(values.get(key).cloned());
        match &next {
            Some(value) => {
                values.insert(key.to_string(), value.clone());
            }
            None => {
                values.remove(key);
            }
        }
        Ok(next)
    }
}
