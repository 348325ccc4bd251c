//! Requirements gating job execution.
//!
//! A [`Requirement`] is a pure predicate over a [`RequirementContext`]. Jobs
//! whose requirements are unmet are held, never failed; a
//! [`RequirementProvider`] publishes a [`RequirementChange`] through its
//! [`RequirementNotifier`] when a condition may have become true, and the
//! queue re-evaluates only the jobs blocked on that condition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use courier_core::RequirementKind;
use courier_events::{EventBus, InMemoryEventBus, RequirementChange};

/// Read-only view of the ambient conditions.
pub trait RequirementContext: Send + Sync {
    fn is_satisfied(&self, kind: RequirementKind) -> bool;
}

impl<T: RequirementContext + ?Sized> RequirementContext for Arc<T> {
    fn is_satisfied(&self, kind: RequirementKind) -> bool {
        (**self).is_satisfied(kind)
    }
}

/// Composable execution precondition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    Condition(RequirementKind),
    /// Satisfied when any member is; evaluated left to right.
    AnyOf(Vec<Requirement>),
}

impl Requirement {
    pub fn network() -> Self {
        Self::Condition(RequirementKind::Network)
    }

    pub fn service() -> Self {
        Self::Condition(RequirementKind::Service)
    }

    pub fn network_or_service() -> Self {
        Self::AnyOf(vec![Self::network(), Self::service()])
    }

    pub fn decryption_key() -> Self {
        Self::Condition(RequirementKind::DecryptionKey)
    }

    pub fn storage_migrated() -> Self {
        Self::Condition(RequirementKind::StorageMigrated)
    }

    pub fn is_present(&self, ctx: &dyn RequirementContext) -> bool {
        match self {
            Requirement::Condition(kind) => ctx.is_satisfied(*kind),
            Requirement::AnyOf(members) => members.iter().any(|m| m.is_present(ctx)),
        }
    }

    pub fn mentions(&self, kind: RequirementKind) -> bool {
        match self {
            Requirement::Condition(k) => *k == kind,
            Requirement::AnyOf(members) => members.iter().any(|m| m.mentions(kind)),
        }
    }
}

/// Handle a provider uses to wake the queue.
#[derive(Debug, Clone)]
pub struct RequirementNotifier {
    bus: Arc<InMemoryEventBus<RequirementChange>>,
}

impl RequirementNotifier {
    pub fn new(bus: Arc<InMemoryEventBus<RequirementChange>>) -> Self {
        Self { bus }
    }

    pub fn notify(&self, kind: RequirementKind) {
        if let Err(err) = self.bus.publish(RequirementChange::new(kind)) {
            warn!(requirement = %kind, error = ?err, "failed to publish requirement change");
        }
    }
}

/// Source of requirement-change notifications.
pub trait RequirementProvider: Send + Sync {
    fn attach(&self, notifier: RequirementNotifier);
}

/// Process-wide requirement flags.
#[derive(Debug, Default)]
pub struct RequirementState {
    network: AtomicBool,
    service: AtomicBool,
    decryption_key: AtomicBool,
    storage_migrated: AtomicBool,
    notifiers: Mutex<Vec<RequirementNotifier>>,
}

impl RequirementState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every condition already satisfied.
    pub fn all_satisfied() -> Self {
        let state = Self::default();
        for kind in RequirementKind::ALL {
            state.flag(kind).store(true, Ordering::SeqCst);
        }
        state
    }

    fn flag(&self, kind: RequirementKind) -> &AtomicBool {
        match kind {
            RequirementKind::Network => &self.network,
            RequirementKind::Service => &self.service,
            RequirementKind::DecryptionKey => &self.decryption_key,
            RequirementKind::StorageMigrated => &self.storage_migrated,
        }
    }

    /// Update a condition; attached notifiers hear about false→true edges.
    pub fn set(&self, kind: RequirementKind, satisfied: bool) {
        let previous = self.flag(kind).swap(satisfied, Ordering::SeqCst);
        if satisfied && !previous {
            debug!(requirement = %kind, "requirement satisfied");
            let notifiers = self.notifiers.lock().unwrap_or_else(|e| e.into_inner());
            for notifier in notifiers.iter() {
                notifier.notify(kind);
            }
        }
    }
}

impl RequirementContext for RequirementState {
    fn is_satisfied(&self, kind: RequirementKind) -> bool {
        self.flag(kind).load(Ordering::SeqCst)
    }
}

impl RequirementProvider for RequirementState {
    fn attach(&self, notifier: RequirementNotifier) {
        self.notifiers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notifier);
    }
}
