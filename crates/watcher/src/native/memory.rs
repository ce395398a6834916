//! In-process scriptable facility
//!
//! Every recorded change is journaled with a fresh identifier, so streams
//! opened later with an explicit `since` replay history exactly like a
//! persistent kernel journal would. Records are reported with the paths
//! and flags they were recorded with.

use super::{
    next_event_identifier, BatchHandler, CoalescingBuffer, NativeFacility, NativeStream, RawEvent,
    StreamRequest,
};
use fsstream_core::error::{Error, Result};
use fsstream_core::event::{EventFlags, EventIdentifier, StreamCreationFlags};
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// A facility whose changes are recorded by the caller
#[derive(Clone, Default)]
pub struct MemoryFacility {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    state: Mutex<JournalState>,
    opened: AtomicUsize,
}

#[derive(Default)]
struct JournalState {
    journal: Vec<JournalEntry>,
    streams: Vec<Weak<MemoryStreamShared>>,
    refusal: Option<String>,
}

struct JournalEntry {
    record: RawEvent,
    own: bool,
}

struct MemoryStreamShared {
    request: StreamRequest,
    buffer: CoalescingBuffer,
    live: AtomicBool,
}

impl MemoryStreamShared {
    /// Translate a journaled change for this stream, if it reports it
    fn report(&self, entry: &JournalEntry) -> Option<RawEvent> {
        let record = &entry.record;
        if !self.request.covers(&record.path) {
            return None;
        }

        let mut flags = record.flags;
        if entry.own {
            if self.request.flags.contains(StreamCreationFlags::IGNORE_SELF) {
                return None;
            }
            if self.request.flags.contains(StreamCreationFlags::MARK_SELF) {
                flags |= EventFlags::OWN_EVENT;
            }
        }
        if self.request.flags.contains(StreamCreationFlags::WATCH_ROOT)
            && self.request.is_root(&record.path)
            && flags.intersects(EventFlags::ITEM_REMOVED | EventFlags::ITEM_RENAMED)
        {
            flags |= EventFlags::ROOT_CHANGED;
        }

        Some(RawEvent::new(record.identifier, record.path.clone(), flags))
    }
}

impl MemoryFacility {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change made by another process
    pub fn record(&self, path: impl Into<PathBuf>, flags: EventFlags) -> EventIdentifier {
        self.append(path.into(), flags, false)
    }

    /// Record a change made by this process
    pub fn record_own(&self, path: impl Into<PathBuf>, flags: EventFlags) -> EventIdentifier {
        self.append(path.into(), flags, true)
    }

    fn append(&self, path: PathBuf, flags: EventFlags, own: bool) -> EventIdentifier {
        let mut state = self.inner.state.lock();
        let entry = JournalEntry {
            record: RawEvent::observed(path, flags),
            own,
        };
        let identifier = entry.record.identifier;

        state.streams.retain(|stream| {
            stream
                .upgrade()
                .is_some_and(|stream| stream.live.load(Ordering::SeqCst))
        });
        for stream in state.streams.iter().filter_map(Weak::upgrade) {
            if let Some(record) = stream.report(&entry) {
                stream.buffer.push([record]);
            }
        }

        state.journal.push(entry);
        identifier
    }

    /// Make every later `open` fail with the given reason
    pub fn refuse_streams(&self, reason: impl Into<String>) {
        self.inner.state.lock().refusal = Some(reason.into());
    }

    pub fn accept_streams(&self) {
        self.inner.state.lock().refusal = None;
    }

    /// Number of subscriptions ever requested, refused ones included
    pub fn open_count(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Number of subscriptions currently running
    pub fn live_streams(&self) -> usize {
        self.inner
            .state
            .lock()
            .streams
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|stream| stream.live.load(Ordering::SeqCst))
            .count()
    }

    pub fn journal_len(&self) -> usize {
        self.inner.state.lock().journal.len()
    }
}

impl fmt::Debug for MemoryFacility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryFacility")
            .field("journal_len", &self.journal_len())
            .field("open_count", &self.open_count())
            .finish()
    }
}

impl NativeFacility for MemoryFacility {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(
        &self,
        request: StreamRequest,
        handler: Arc<dyn BatchHandler>,
    ) -> Result<Box<dyn NativeStream>> {
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        let mut state = self.inner.state.lock();
        if let Some(reason) = &state.refusal {
            warn!("Memory facility refused stream: {}", reason);
            return Err(Error::stream_creation(reason.clone()));
        }

        let buffer = CoalescingBuffer::new(&request, handler);
        let shared = Arc::new(MemoryStreamShared {
            request,
            buffer,
            live: AtomicBool::new(true),
        });

        if shared.request.replays_history() {
            let since = shared.request.since;
            let history: Vec<RawEvent> = state
                .journal
                .iter()
                .filter(|entry| entry.record.identifier > since)
                .filter_map(|entry| shared.report(entry))
                .collect();
            debug!("Replaying {} journaled change(s) after {}", history.len(), since);
            shared.buffer.push(history);
            shared
                .buffer
                .push_marker(shared.request.history_done_path(), EventFlags::HISTORY_DONE);
            shared.buffer.flush();
        }

        state.streams.push(Arc::downgrade(&shared));
        info!(
            "Opened memory stream on {} path(s)",
            shared.request.watched_paths.len()
        );
        Ok(Box::new(MemoryStream { shared }))
    }
}

struct MemoryStream {
    shared: Arc<MemoryStreamShared>,
}

impl NativeStream for MemoryStream {
    fn flush(&self) {
        self.shared.buffer.flush();
    }

    fn stop(&mut self) {
        if self.shared.live.swap(false, Ordering::SeqCst) {
            self.shared.buffer.stop();
            debug!("Stopped memory stream");
        }
    }

    fn describe(&self) -> String {
        let request = &self.shared.request;
        format!(
            "memory stream on [{}] since {} latency {:?} flags {} ({} pending)",
            request
                .watched_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            request.since,
            request.latency,
            request.flags,
            self.shared.buffer.pending_count()
        )
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        self.stop();
    }
}
