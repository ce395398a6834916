//! Record construction and filtering between a native stream and dispatch

use crate::dispatch::DispatchSender;
use crate::filter::{DirectScope, ExclusionFilter};
use crate::native::{BatchHandler, RawEvent};
use fsstream_core::config::StreamConfig;
use fsstream_core::event::{Event, EventFlags, EventIdentifier};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

/// Filters one subscription's batches and forwards them to dispatch
pub struct EventPipeline {
    generation: u64,
    exclusions: ExclusionFilter,
    scope: Option<DirectScope>,
    since: EventIdentifier,
    outlet: DispatchSender,
    accepting: AtomicBool,
}

impl EventPipeline {
    pub fn new(config: &StreamConfig, generation: u64, outlet: DispatchSender) -> Self {
        Self {
            generation,
            exclusions: ExclusionFilter::from_paths(config.excluded_paths().iter().cloned()),
            scope: config
                .ignore_sub_directories()
                .then(|| DirectScope::new(config.watched_paths())),
            since: config.since_event_identifier(),
            outlet,
            accepting: AtomicBool::new(true),
        }
    }

    /// Build records for a raw batch, dropping the ones not to deliver
    pub fn process(&self, batch: Vec<RawEvent>) -> Vec<Event> {
        batch
            .into_iter()
            .filter(|raw| self.admits(raw))
            .map(|raw| Event::new(raw.identifier, raw.path, raw.flags))
            .collect()
    }

    fn admits(&self, raw: &RawEvent) -> bool {
        if raw.identifier.is_since_now() {
            warn!("Dropping record for {:?} without an identifier", raw.path);
            return false;
        }
        if !self.since.is_since_now()
            && raw.identifier <= self.since
            && !raw.flags.contains(EventFlags::HISTORY_DONE)
        {
            trace!("Dropping already delivered record {}", raw.identifier);
            return false;
        }
        if let Some(scope) = &self.scope {
            if !scope.admits(&raw.path) {
                trace!("Dropping record below direct children: {:?}", raw.path);
                return false;
            }
        }
        !self.exclusions.is_excluded(&raw.path)
    }

    /// Stop forwarding; batches arriving afterwards are discarded
    pub fn close(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn exclusions(&self) -> &ExclusionFilter {
        &self.exclusions
    }
}

impl BatchHandler for EventPipeline {
    fn handle_batch(&self, batch: Vec<RawEvent>) {
        if !self.is_accepting() {
            debug!("Discarding batch of {} after close", batch.len());
            return;
        }

        let received = batch.len();
        let events = self.process(batch);
        if events.is_empty() {
            trace!("All {} record(s) in batch filtered", received);
            return;
        }

        debug!(
            "Forwarding {} of {} record(s) (generation {})",
            events.len(),
            received,
            self.generation
        );
        if !self.outlet.send_batch(self.generation, events) {
            debug!("Dispatch closed; batch dropped");
        }
    }
}
