//! Shared primitives for the delivery engine.
//!
//! Pure value types only (no IO, no threads).

pub mod address;
pub mod error;
pub mod id;
pub mod requirement;

pub use address::{Address, GroupId};
pub use error::CoreError;
pub use id::JobId;
pub use requirement::RequirementKind;
