//! poolet-store: State store access for poolet
//!
//! This crate provides the seams to the world outside the scheduler:
//! - The `StateClient` watch/list/get/patch trait
//! - The `EventRecorder` diagnostics sink
//! - In-memory implementations of both for standalone mode and tests

pub mod memory;
pub mod recorder;
pub mod traits;

pub use memory::MemoryStore;
pub use recorder::EventLog;
pub use traits::{EventRecorder, InstanceFilter, StateClient, StateList};
