//! poolet-scheduler: capacity-aware scheduler for poolet
//!
//! This crate places unassigned instances onto containers:
//! - Assumed-state cache of containers and the instances recorded on them
//! - Snapshots giving each decision a stable view of the cache
//! - Filter and score placement
//! - Event adapter, work queue and the supervising run loop

pub mod cache;
pub mod handler;
pub mod placement;
pub mod queue;
pub mod scheduler;
pub mod snapshot;

pub use cache::{Cache, CacheDump};
pub use handler::EventHandler;
pub use placement::{MostAllocatable, PlacementDecision, PlacementStrategy, Rejections, Unfit};
pub use queue::WorkQueue;
pub use scheduler::{ScheduleOutcome, Scheduler, SchedulerStatus};
pub use snapshot::{ContainerInfo, Snapshot};
