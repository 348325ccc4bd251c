//! Inbound path: the streaming observer and on-demand pulls share one lock
//! so only one of them drains the transport at a time.

mod lock;
mod observer;
mod processor;

pub use lock::ReceiveLock;
pub use observer::{IncomingMessageObserver, ObserverHandle};
pub use processor::{EnvelopeProcessor, pull_and_process};
