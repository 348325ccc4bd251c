use courier_core::RequirementKind;
use serde::{Deserialize, Serialize};

/// Published by a requirement provider when a condition may have become true.
///
/// Receivers re-evaluate only jobs blocked on `kind`; a spurious change is
/// harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementChange {
    pub kind: RequirementKind,
}

impl RequirementChange {
    pub fn new(kind: RequirementKind) -> Self {
        Self { kind }
    }
}
