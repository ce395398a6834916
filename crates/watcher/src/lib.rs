#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! File system change streams
//!
//! This crate subscribes to change notifications for a set of directory
//! trees and delivers them as ordered, identified records:
//! - Latency coalescing of repeated changes to the same path
//! - Exclusion of subtrees and direct-children-only watching
//! - Resumption from a previously delivered event identifier
//! - Synchronous and asynchronous flushing
//! - Serialized delivery to one consumer on one execution context
//!
//! # Example
//!
//! ```no_run
//! use fsstream_watcher::EventsManager;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut manager = EventsManager::builder(["/path/to/project"])
//!     .exclude("/path/to/project/target")
//!     .callback(|_manager, event| println!("{event}"))
//!     .build()?;
//!
//! // Deliver everything seen so far before continuing
//! manager.flush_synchronously().await?;
//! manager.close();
//! # Ok(())
//! # }
//! ```

pub mod native;

// Private implementation modules
mod context;
mod dispatch;
mod filter;
mod manager;
mod pipeline;
mod subscription;

// Public exports
pub use context::ExecutionContext;
pub use dispatch::{CallbackConsumer, EventConsumer, EventsObserver, ObserverConsumer};
pub use filter::{DirectScope, ExclusionFilter, ExclusionFilterBuilder};
pub use manager::{EventsManager, EventsManagerBuilder, EventsManagerView, StreamState};
pub use native::{
    current_event_identifier, MemoryFacility, NativeFacility, RecommendedFacility,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::manager::{EventsManager, EventsManagerView, StreamState};
    pub use crate::native::{MemoryFacility, NativeFacility};
    pub use fsstream_core::event::{Event, EventFlags, EventIdentifier, StreamCreationFlags};
}
