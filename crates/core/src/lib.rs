#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! Core types for the fsstream change-notification system
//!
//! This crate provides the foundational pieces shared by the watcher and the
//! command line tool:
//!
//! - **Events**: event identifiers, change flags and immutable event records
//! - **Configuration**: stream configuration snapshots and settings loading
//! - **Error handling**: unified error types
//!

pub mod config;
pub mod error;
pub mod event;

// Re-export main types for convenience
pub use config::{default_settings_path, StreamConfig, StreamConfigBuilder, StreamSettings};
pub use error::{Error, Result, ResultExt};
pub use event::{Event, EventFlags, EventIdentifier, StreamCreationFlags};

/// Version of the core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::StreamConfig;
    pub use crate::error::{Result, ResultExt};
    pub use crate::event::{Event, EventFlags, EventIdentifier};
}
