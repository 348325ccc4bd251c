//! Job kind tag → constructor registry.
//!
//! Factories capture the collaborators a job needs, so dependencies are wired
//! once at startup and handed over when a record is revived.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::job::{Job, JobError};

pub type JobFactory = Box<dyn Fn(&Value) -> Result<Box<dyn Job>, JobError> + Send + Sync>;

#[derive(Default)]
pub struct JobRegistry {
    factories: HashMap<&'static str, JobFactory>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds = self.kinds();
        kinds.sort_unstable();
        f.debug_struct("JobRegistry").field("kinds", &kinds).finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw factory. A later registration for the same tag wins.
    pub fn register<F>(&mut self, kind: &'static str, factory: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Job>, JobError> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Box::new(factory));
    }

    /// Register a job whose payload deserializes into `P`.
    pub fn register_payload<P, J, F>(&mut self, kind: &'static str, build: F)
    where
        P: DeserializeOwned,
        J: Job + 'static,
        F: Fn(P) -> J + Send + Sync + 'static,
    {
        self.register(kind, move |payload| {
            let decoded: P = serde_json::from_value(payload.clone())
                .map_err(|e| JobError::malformed(format!("{kind}: {e}")))?;
            Ok(Box::new(build(decoded)))
        });
    }

    pub fn instantiate(&self, kind: &str, payload: &Value) -> Result<Box<dyn Job>, JobError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| JobError::HandlerNotFound(kind.to_string()))?;
        factory(payload)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}
