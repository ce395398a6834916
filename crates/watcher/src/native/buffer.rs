//! Latency coalescing of raw change records
//!
//! Records for the same path arriving inside one latency window are merged:
//! their flags are OR-ed together while the first record's identifier and
//! position are kept, so identifiers within a batch stay increasing.
//! Stream-level markers such as `HISTORY_DONE` never merge.

use super::{BatchHandler, RawEvent, StreamRequest};
use crate::context::ExecutionContext;
use fsstream_core::{EventFlags, EventIdentifier, StreamCreationFlags};
use indexmap::map::Entry;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Collects records for one latency window and emits them as a batch
#[derive(Clone)]
pub struct CoalescingBuffer {
    inner: Arc<BufferInner>,
}

struct BufferInner {
    latency: Duration,
    no_defer: bool,
    handler: Arc<dyn BatchHandler>,
    context: ExecutionContext,
    state: Mutex<BufferState>,
    shutdown: CancellationToken,
}

/// Records merge per path; each marker keeps its own slot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PendingKey {
    Path(PathBuf),
    Marker(u64),
}

#[derive(Default)]
struct BufferState {
    pending: IndexMap<PendingKey, RawEvent>,
    timer_armed: bool,
    last_emit: Option<Instant>,
    stopped: bool,
}

impl CoalescingBuffer {
    pub fn new(request: &StreamRequest, handler: Arc<dyn BatchHandler>) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                latency: request.latency,
                no_defer: request.flags.contains(StreamCreationFlags::NO_DEFER),
                handler,
                context: request.context.clone(),
                state: Mutex::new(BufferState::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Add records to the current window
    pub fn push(&self, records: impl IntoIterator<Item = RawEvent>) {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.stopped {
            return;
        }

        let was_idle = state.pending.is_empty();
        for record in records {
            match state.pending.entry(PendingKey::Path(record.path.clone())) {
                Entry::Occupied(mut existing) => {
                    trace!("Coalescing change for {:?}", record.path);
                    existing.get_mut().flags |= record.flags;
                }
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
            }
        }
        if state.pending.is_empty() {
            return;
        }

        let quiet = state
            .last_emit
            .map_or(true, |at| at.elapsed() >= inner.latency);
        if inner.no_defer && was_idle && quiet {
            inner.emit(&mut state);
            return;
        }

        inner.arm_timer(&mut state);
    }

    /// Append a stream-level marker behind everything pending
    ///
    /// The identifier is assigned under the buffer lock, so any record
    /// pushed afterwards carries a later one. The marker leaves with the next
    /// flush or window and never arms a timer itself. Returns `None` once
    /// stopped.
    pub fn push_marker(
        &self,
        path: impl Into<PathBuf>,
        flags: EventFlags,
    ) -> Option<EventIdentifier> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.stopped {
            return None;
        }

        let marker = RawEvent::observed(path, flags);
        let identifier = marker.identifier;
        state
            .pending
            .insert(PendingKey::Marker(identifier.value()), marker);
        trace!("Queued marker {} ({})", identifier, flags);
        Some(identifier)
    }

    /// Emit everything pending without waiting for the latency window
    pub fn flush(&self) {
        let mut state = self.inner.state.lock();
        if !state.stopped {
            self.inner.emit(&mut state);
        }
    }

    /// Discard pending records and stop emitting
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        if !state.pending.is_empty() {
            debug!("Discarding {} pending change(s)", state.pending.len());
        }
        state.stopped = true;
        state.pending.clear();
        self.inner.shutdown.cancel();
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

}

impl BufferInner {
    /// One timer per window; it emits whatever is pending when it fires
    fn arm_timer(self: &Arc<Self>, state: &mut BufferState) {
        if state.timer_armed {
            return;
        }
        state.timer_armed = true;
        let buffer = Arc::clone(self);
        self.context.spawn(async move {
            tokio::select! {
                _ = buffer.shutdown.cancelled() => {}
                _ = tokio::time::sleep(buffer.latency) => {
                    let mut state = buffer.state.lock();
                    state.timer_armed = false;
                    if !state.stopped {
                        buffer.emit(&mut state);
                    }
                }
            }
        });
    }

    /// Called with the state lock held so batches leave in the order
    /// their records arrived.
    fn emit(&self, state: &mut BufferState) {
        if state.pending.is_empty() {
            return;
        }
        let batch: Vec<RawEvent> = state.pending.drain(..).map(|(_, record)| record).collect();
        state.last_emit = Some(Instant::now());
        debug!("Emitting batch of {} change(s)", batch.len());
        self.handler.handle_batch(batch);
    }
}
