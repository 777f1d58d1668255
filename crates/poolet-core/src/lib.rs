//! poolet-core: Core types for the poolet scheduler
//!
//! This crate provides the fundamental types used throughout the poolet system:
//! - Instance and container definitions
//! - Quantities, taints, tolerations and label selectors
//! - Watch events and diagnostics
//! - Configuration and manifest types
//! - Error handling

pub mod config;
pub mod error;
pub mod event;
pub mod manifest;
pub mod model;
pub mod quantity;
pub mod selector;

pub use self::config::*;
pub use error::*;
pub use event::*;
pub use manifest::*;
pub use model::*;
pub use quantity::*;
pub use selector::*;
