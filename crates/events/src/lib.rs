//! Pub/sub mechanics and the notifications the delivery engine emits.

pub mod bus;
pub mod in_memory_bus;
pub mod job;
pub mod progress;
pub mod requirement;

pub use bus::{EventBus, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use job::{JobEvent, JobEventKind};
pub use progress::AttachmentProgress;
pub use requirement::RequirementChange;
