//! poolet-api: REST API server for poolet
//!
//! This crate provides the REST API for interacting with poolet:
//! - Container and instance listing, creation and deletion
//! - Scheduling diagnostics
//! - Scheduler and cache status

pub mod rest;

pub use rest::{create_router, AppState};
