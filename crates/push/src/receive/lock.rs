use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Named mutex guarding the inbound message channel.
///
/// Clones share the same underlying lock.
#[derive(Clone)]
pub struct ReceiveLock {
    name: &'static str,
    inner: Arc<Mutex<()>>,
}

impl ReceiveLock {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Block until the channel is ours.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, ()>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(std::sync::TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }
}

impl Default for ReceiveLock {
    fn default() -> Self {
        Self::new("receive")
    }
}

impl fmt::Debug for ReceiveLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiveLock").field("name", &self.name).finish()
    }
}
