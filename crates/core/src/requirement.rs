//! Named environmental conditions a job may wait on.

use core::fmt;

use serde::{Deserialize, Serialize};

/// A single condition that a requirement provider can report on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    /// A network connection is available.
    Network,
    /// The messaging service is reachable.
    Service,
    /// The local decryption key is unlocked.
    DecryptionKey,
    /// Local storage has finished its schema migration.
    StorageMigrated,
}

impl RequirementKind {
    pub const ALL: [RequirementKind; 4] = [
        RequirementKind::Network,
        RequirementKind::Service,
        RequirementKind::DecryptionKey,
        RequirementKind::StorageMigrated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementKind::Network => "network",
            RequirementKind::Service => "service",
            RequirementKind::DecryptionKey => "decryption_key",
            RequirementKind::StorageMigrated => "storage_migrated",
        }
    }
}

impl fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
