//! Event contract and pub/sub mechanics for authority change notifications.
//!
//! The authority persists no audit history itself. It publishes facts to a bus
//! and external collaborators (audit log writers, notifiers) subscribe.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{BusClosed, EventBus, Subscription};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
