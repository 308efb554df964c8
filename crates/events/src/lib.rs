//! Transition events and their distribution.
//!
//! Domain crates describe what happened as typed [`Event`]s; infrastructure wraps
//! them in an [`EventEnvelope`] after the ledger commit and fans them out over an
//! [`EventBus`].

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
