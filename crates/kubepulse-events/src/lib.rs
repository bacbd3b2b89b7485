//! Event and namespace queries for kubepulse
//!
//! This crate holds the per-context working sets, the event filter and the
//! refresh loops that keep them current.

pub mod buffer;
pub mod engine;
pub mod filter;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use buffer::EventBuffer;
pub use engine::{DEFAULT_QUERY_TIMEOUT, EventsSnapshot, QueryError, ResourceQueryEngine};
pub use filter::CompiledEventFilter;
pub use scheduler::{RefreshScheduler, RefreshState};
