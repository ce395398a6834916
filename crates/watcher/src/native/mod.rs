//! Native notification facilities
//!
//! A facility allocates OS-level subscriptions over a set of root paths and
//! hands coalesced batches of raw change records to a [`BatchHandler`].
//! Two facilities ship with the crate:
//!
//! - [`RecommendedFacility`] wraps the platform watcher chosen by `notify`
//! - [`MemoryFacility`] is a scriptable journal used by tests and tooling

mod buffer;
mod memory;
mod recommended;

pub use buffer::CoalescingBuffer;
pub use memory::MemoryFacility;
pub use recommended::RecommendedFacility;

use crate::context::ExecutionContext;
use fsstream_core::config::StreamConfig;
use fsstream_core::error::Result;
use fsstream_core::event::{EventFlags, EventIdentifier, StreamCreationFlags};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Highest identifier a facility may assign; `u64::MAX` is the since-now cursor
const MAX_ASSIGNED_IDENTIFIER: u64 = u64::MAX - 1;

/// Last identifier handed out in this process
static LAST_EVENT_IDENTIFIER: AtomicU64 = AtomicU64::new(0);

/// Wall-clock microseconds, the floor every identifier is raised to
fn clock_floor() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_micros()).unwrap_or(MAX_ASSIGNED_IDENTIFIER))
        .unwrap_or(0)
        .min(MAX_ASSIGNED_IDENTIFIER)
}

/// Identifier of the most recent change in this process
///
/// Every identifier assigned after this call is strictly greater, including
/// identifiers assigned by later processes, since the counter is seeded from
/// the wall clock. Never returns [`EventIdentifier::SINCE_NOW`].
pub fn current_event_identifier() -> EventIdentifier {
    let floor = clock_floor();
    let previous = LAST_EVENT_IDENTIFIER.fetch_max(floor, Ordering::SeqCst);
    EventIdentifier::new(previous.max(floor))
}

/// Assign the identifier for a newly observed change
pub fn next_event_identifier() -> EventIdentifier {
    let advance = |previous: u64, floor: u64| {
        previous
            .saturating_add(1)
            .max(floor)
            .min(MAX_ASSIGNED_IDENTIFIER)
    };
    let floor = clock_floor();
    let previous = LAST_EVENT_IDENTIFIER
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |previous| {
            Some(advance(previous, floor))
        })
        .unwrap_or_else(|previous| previous);
    EventIdentifier::new(advance(previous, floor))
}

/// A change record as reported by a facility, before filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub identifier: EventIdentifier,
    pub path: PathBuf,
    pub flags: EventFlags,
}

impl RawEvent {
    pub fn new(identifier: EventIdentifier, path: impl Into<PathBuf>, flags: EventFlags) -> Self {
        Self {
            identifier,
            path: path.into(),
            flags,
        }
    }

    /// Record a change observed now, assigning it the next identifier
    pub fn observed(path: impl Into<PathBuf>, flags: EventFlags) -> Self {
        Self::new(next_event_identifier(), path, flags)
    }
}

/// Receives coalesced batches from a live native stream
///
/// Called from whatever thread the facility delivers on. Implementations
/// must not block.
pub trait BatchHandler: Send + Sync {
    fn handle_batch(&self, batch: Vec<RawEvent>);
}

/// Everything a facility needs to open one subscription
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub watched_paths: Vec<PathBuf>,
    pub since: EventIdentifier,
    pub latency: Duration,
    pub flags: StreamCreationFlags,
    /// Watch whole subtrees rather than direct children only
    pub recursive: bool,
    pub context: ExecutionContext,
}

impl StreamRequest {
    pub fn from_config(config: &StreamConfig, context: ExecutionContext) -> Self {
        Self {
            watched_paths: config.watched_paths().to_vec(),
            since: config.since_event_identifier(),
            latency: config.notification_latency(),
            flags: config.creation_flags(),
            recursive: !config.ignore_sub_directories(),
            context,
        }
    }

    /// Whether a change at `path` falls inside the requested scope
    pub fn covers(&self, path: &Path) -> bool {
        self.watched_paths.iter().any(|root| {
            if self.recursive {
                path.starts_with(root)
            } else {
                path == root || path.parent() == Some(root.as_path())
            }
        })
    }

    /// Whether `path` is one of the watched roots
    pub fn is_root(&self, path: &Path) -> bool {
        self.watched_paths.iter().any(|root| root == path)
    }

    pub fn replays_history(&self) -> bool {
        !self.since.is_since_now()
    }

    /// Path carried by the single history-done record
    pub fn history_done_path(&self) -> PathBuf {
        self.watched_paths.first().cloned().unwrap_or_default()
    }
}

/// An OS-level change notification facility
pub trait NativeFacility: Send + Sync + fmt::Debug {
    /// Short name used in logs and descriptions
    fn name(&self) -> &'static str;

    /// Allocate and start a subscription
    ///
    /// Fails with [`StreamCreation`](fsstream_core::Error::StreamCreation)
    /// when the facility refuses. On failure nothing is left running.
    fn open(
        &self,
        request: StreamRequest,
        handler: Arc<dyn BatchHandler>,
    ) -> Result<Box<dyn NativeStream>>;
}

/// A live native subscription
pub trait NativeStream: Send + Sync {
    /// Hand every pending record to the handler now
    fn flush(&self);

    /// Stop delivery and release the subscription. Idempotent.
    fn stop(&mut self);

    /// Diagnostic description of the live subscription
    fn describe(&self) -> String;
}

/// The facility used when none is configured
pub fn default_facility() -> Arc<dyn NativeFacility> {
    Arc::new(RecommendedFacility::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_strictly_increase() {
        let mut previous = next_event_identifier();
        for _ in 0..1000 {
            let next = next_event_identifier();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_current_precedes_next() {
        let current = current_event_identifier();
        let next = next_event_identifier();
        assert!(!current.is_since_now());
        assert!(next > current);
    }

    #[test]
    fn test_current_does_not_consume() {
        let first = current_event_identifier();
        let second = current_event_identifier();
        assert!(second >= first);
    }

    #[tokio::test]
    async fn test_request_scope() {
        let config = StreamConfig::builder(["/tmp/a"])
            .build()
            .expect("valid configuration");
        let context = ExecutionContext::current().expect("runtime");
        let recursive = StreamRequest::from_config(&config, context.clone());

        assert!(recursive.covers(Path::new("/tmp/a/b/c")));
        assert!(!recursive.covers(Path::new("/tmp/ab")));
        assert!(!recursive.replays_history());

        let direct = StreamRequest::from_config(&config.with_ignore_sub_directories(true), context);
        assert!(direct.covers(Path::new("/tmp/a")));
        assert!(direct.covers(Path::new("/tmp/a/b")));
        assert!(!direct.covers(Path::new("/tmp/a/b/c")));
        assert!(direct.is_root(Path::new("/tmp/a")));
    }
}
