//! Gantry Event Bus
//!
//! In-process implementation of the core `EventBus` port over a tokio
//! broadcast channel, keeping NATS-style subjects so observers filter with
//! wildcard patterns.

pub mod bus;
pub mod subject;

pub use bus::MemoryEventBus;
pub use subject::SubjectPattern;
