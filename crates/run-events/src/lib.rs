//! Run-lifecycle and node-lifecycle events: an append-only, strictly
//! ordered log per run, plus a publish/subscribe bus layered on top.
//!
//! Sequence numbers are allocated by the store, atomically per run and
//! *before* any broadcast, so listeners only ever observe events that are
//! already durably committed.

mod bus;
mod model;
mod store;

pub use bus::{EventBus, Subscription};
pub use model::{NewRunEvent, RunEvent, RunEventKind};
pub use store::{EventQuery, EventsStore, InMemoryEventsStore};

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum EventError {
    #[error("Event store error: {0}")]
    Store(String),
}
