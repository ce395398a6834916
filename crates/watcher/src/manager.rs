//! Events manager: the public face of a change subscription
//!
//! A manager owns one live subscription on a native facility, filters what
//! it reports and delivers every surviving record, one at a time and in
//! identifier order, to a single consumer on its execution context.
//!
//! Changing the exclusion set or the sub-directory policy closes the live
//! subscription and opens a new one. Records queued by the old subscription
//! but not yet delivered are discarded; when the stream was opened from an
//! explicit identifier the new subscription resumes after the last delivered
//! record.

use crate::context::ExecutionContext;
use crate::dispatch::{
    CallbackConsumer, DispatchEngine, DispatchSender, EventConsumer, EventsObserver,
    ObserverConsumer,
};
use crate::native::{self, NativeFacility};
use crate::subscription::Subscription;
use fsstream_core::config::{StreamConfig, StreamConfigBuilder};
use fsstream_core::error::{Error, Result};
use fsstream_core::event::{Event, EventIdentifier, StreamCreationFlags};
use parking_lot::RwLock;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

/// Lifecycle of a manager's subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Unopened,
    Open,
    Closed,
    /// A rebuild could not open a new subscription
    Failed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unopened => "unopened",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// State shared between a manager, its views and its dispatch task
pub(crate) struct ManagerState {
    config: RwLock<StreamConfig>,
    lifecycle: RwLock<StreamState>,
    generation: AtomicU64,
    last_event: RwLock<Option<Arc<Event>>>,
    delivered: AtomicU64,
    facility: &'static str,
}

impl ManagerState {
    pub(crate) fn new(config: StreamConfig, facility: &'static str) -> Self {
        Self {
            config: RwLock::new(config),
            lifecycle: RwLock::new(StreamState::Unopened),
            generation: AtomicU64::new(0),
            last_event: RwLock::new(None),
            delivered: AtomicU64::new(0),
            facility,
        }
    }

    /// Start a new subscription generation; earlier ones become stale
    pub(crate) fn begin_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn mark_open(&self) {
        self.set_lifecycle(StreamState::Open);
    }

    fn set_lifecycle(&self, state: StreamState) {
        *self.lifecycle.write() = state;
    }

    fn lifecycle(&self) -> StreamState {
        *self.lifecycle.read()
    }

    /// Whether batches from `generation` may still be delivered
    pub(crate) fn accepts(&self, generation: u64) -> bool {
        self.lifecycle() == StreamState::Open
            && self.generation.load(Ordering::SeqCst) == generation
    }

    pub(crate) fn last_event_identifier(&self) -> Option<EventIdentifier> {
        self.last_event.read().as_ref().map(|event| event.identifier())
    }

    pub(crate) fn record_delivery(&self, event: Arc<Event>) {
        *self.last_event.write() = Some(event);
        self.delivered.fetch_add(1, Ordering::SeqCst);
    }

    fn config(&self) -> StreamConfig {
        self.config.read().clone()
    }

    fn set_config(&self, config: StreamConfig) {
        *self.config.write() = config;
    }
}

/// Read-only handle on a manager, passed to consumers with every record
#[derive(Clone)]
pub struct EventsManagerView {
    shared: Arc<ManagerState>,
}

impl EventsManagerView {
    pub(crate) fn new(shared: Arc<ManagerState>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &ManagerState {
        &self.shared
    }

    pub fn state(&self) -> StreamState {
        self.shared.lifecycle()
    }

    pub fn is_open(&self) -> bool {
        self.state() == StreamState::Open
    }

    /// Most recently delivered record
    ///
    /// During a delivery this is the record being delivered.
    pub fn last_event(&self) -> Option<Arc<Event>> {
        self.shared.last_event.read().clone()
    }

    pub fn delivered_count(&self) -> u64 {
        self.shared.delivered.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> StreamConfig {
        self.shared.config()
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.shared.config.read().watched_paths().to_vec()
    }

    pub fn excluded_paths(&self) -> Vec<PathBuf> {
        self.shared.config.read().excluded_paths().to_vec()
    }

    pub fn ignore_sub_directories(&self) -> bool {
        self.shared.config.read().ignore_sub_directories()
    }

    /// Starting cursor of the live subscription
    pub fn since_event_identifier(&self) -> EventIdentifier {
        self.shared.config.read().since_event_identifier()
    }

    pub fn notification_latency(&self) -> Duration {
        self.shared.config.read().notification_latency()
    }

    pub fn creation_flags(&self) -> StreamCreationFlags {
        self.shared.config.read().creation_flags()
    }

    pub fn facility_name(&self) -> &'static str {
        self.shared.facility
    }
}

impl fmt::Debug for EventsManagerView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventsManagerView")
            .field("state", &self.state())
            .field("watched_paths", &self.watched_paths())
            .field("delivered", &self.delivered_count())
            .finish()
    }
}

/// A live change subscription delivering records to one consumer
pub struct EventsManager {
    view: EventsManagerView,
    facility: Arc<dyn NativeFacility>,
    context: ExecutionContext,
    subscription: Option<Subscription>,
    dispatch: Option<DispatchSender>,
}

impl EventsManager {
    /// Configure a manager watching `watched_paths`
    pub fn builder<I, P>(watched_paths: I) -> EventsManagerBuilder
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        EventsManagerBuilder::new(watched_paths)
    }

    /// Watch with default options, delivering to a closure
    pub fn with_callback<I, P, F>(watched_paths: I, callback: F) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
        F: Fn(&EventsManagerView, &Event) + Send + Sync + 'static,
    {
        Self::builder(watched_paths).callback(callback).build()
    }

    /// Watch with default options, delivering to a weakly held observer
    pub fn with_observer<I, P, O>(watched_paths: I, observer: &Arc<O>) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
        O: EventsObserver + 'static,
    {
        Self::builder(watched_paths).observer(observer).build()
    }

    /// Open a subscription and start delivering
    ///
    /// Fails with `InvalidConfiguration` before touching the facility when
    /// the configuration is unusable, and with `StreamCreation` when the
    /// facility refuses the subscription.
    pub fn open(
        config: StreamConfig,
        consumer: Arc<dyn EventConsumer>,
        context: ExecutionContext,
        facility: Arc<dyn NativeFacility>,
    ) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(ManagerState::new(config.clone(), facility.name()));
        let view = EventsManagerView::new(Arc::clone(&shared));
        let (engine, sender) = DispatchEngine::new(consumer, view.clone());

        let generation = shared.begin_generation();
        let subscription = match Subscription::open(
            facility.as_ref(),
            &config,
            &context,
            sender.clone(),
            generation,
        ) {
            Ok(subscription) => subscription,
            Err(e) => {
                shared.set_lifecycle(StreamState::Failed);
                error!("Failed to open event stream: {}", e);
                return Err(e);
            }
        };

        shared.mark_open();
        context.spawn(engine.run());
        info!(
            "Watching {} path(s) via {} facility (since {}, latency {:?})",
            config.watched_paths().len(),
            facility.name(),
            config.since_event_identifier(),
            config.notification_latency()
        );

        Ok(Self {
            view,
            facility,
            context,
            subscription: Some(subscription),
            dispatch: Some(sender),
        })
    }

    /// Identifier of the most recent change known to the facility
    ///
    /// Needs no open manager; see [`native::current_event_identifier`].
    pub fn current_event_identifier() -> EventIdentifier {
        native::current_event_identifier()
    }

    /// Deliver every pending record before returning
    ///
    /// Returns once all records accepted before the call have been handed
    /// to the consumer. A no-op unless the stream is open.
    pub async fn flush_synchronously(&self) -> Result<()> {
        match self.request_barrier() {
            Some(done) => done.await.map_err(|_| dispatch_stopped()),
            None => Ok(()),
        }
    }

    /// [`flush_synchronously`](Self::flush_synchronously) for callers
    /// outside the runtime
    ///
    /// Panics when called from within an asynchronous context.
    pub fn blocking_flush(&self) -> Result<()> {
        match self.request_barrier() {
            Some(done) => done.blocking_recv().map_err(|_| dispatch_stopped()),
            None => Ok(()),
        }
    }

    /// Schedule delivery of every pending record and return immediately
    pub fn flush_asynchronously(&self) {
        if !self.is_open() {
            return;
        }
        if let Some(subscription) = &self.subscription {
            subscription.flush();
        }
    }

    fn request_barrier(&self) -> Option<oneshot::Receiver<()>> {
        if !self.is_open() {
            return None;
        }
        self.subscription.as_ref()?.flush();
        self.dispatch.as_ref()?.barrier()
    }

    /// Human readable description of the live subscription
    pub fn describe(&self) -> String {
        let prefix = format!(
            "events manager ({}, {} facility, {} delivered)",
            self.state(),
            self.view.facility_name(),
            self.view.delivered_count()
        );
        match &self.subscription {
            Some(subscription) => format!("{prefix}: {}", subscription.describe()),
            None => {
                let paths: Vec<String> = self
                    .watched_paths()
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect();
                format!("{prefix}: no live stream on [{}]", paths.join(", "))
            }
        }
    }

    /// Replace the excluded subtrees, rebuilding the subscription
    ///
    /// A no-op unless the stream is open. Relative paths are rejected with
    /// `InvalidConfiguration` and leave the stream untouched.
    pub fn set_excluded_paths<I, P>(&mut self, excluded_paths: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        if !self.is_open() {
            debug!("Ignoring exclusion change on {} stream", self.state());
            return Ok(());
        }
        let current = self.view.config();
        let config = current.with_excluded_paths(excluded_paths);
        config.validate()?;
        if config.excluded_paths() == current.excluded_paths() {
            return Ok(());
        }
        self.rebuild(config)
    }

    /// Switch between whole-subtree and direct-children watching
    pub fn set_ignore_sub_directories(&mut self, ignore: bool) -> Result<()> {
        if !self.is_open() {
            debug!("Ignoring sub-directory change on {} stream", self.state());
            return Ok(());
        }
        let current = self.view.config();
        if current.ignore_sub_directories() == ignore {
            return Ok(());
        }
        self.rebuild(current.with_ignore_sub_directories(ignore))
    }

    fn rebuild(&mut self, config: StreamConfig) -> Result<()> {
        if let Some(mut previous) = self.subscription.take() {
            previous.close();
        }
        let Some(sender) = self.dispatch.clone() else {
            return Ok(());
        };

        let shared = self.view.shared();
        let original = config.since_event_identifier();
        let since = if original.is_since_now() {
            original
        } else {
            shared.last_event_identifier().unwrap_or(original)
        };
        let config = config.with_since_event_identifier(since);

        let generation = shared.begin_generation();
        match Subscription::open(
            self.facility.as_ref(),
            &config,
            &self.context,
            sender,
            generation,
        ) {
            Ok(subscription) => {
                info!(
                    "Rebuilt event stream (generation {}, {} exclusion(s), ignore sub-directories: {})",
                    generation,
                    config.excluded_paths().len(),
                    config.ignore_sub_directories()
                );
                shared.set_config(config);
                self.subscription = Some(subscription);
                Ok(())
            }
            Err(e) => {
                error!("Failed to rebuild event stream: {}", e);
                shared.set_lifecycle(StreamState::Failed);
                self.dispatch = None;
                Err(e)
            }
        }
    }

    /// Stop delivery and release the subscription. Idempotent.
    ///
    /// A batch already being delivered when close begins completes; nothing
    /// is delivered after that.
    pub fn close(&mut self) {
        if self.subscription.is_none() && self.dispatch.is_none() {
            return;
        }
        let shared = self.view.shared();
        if shared.lifecycle() == StreamState::Open {
            shared.set_lifecycle(StreamState::Closed);
        }
        if let Some(mut subscription) = self.subscription.take() {
            subscription.close();
        }
        self.dispatch = None;
        info!(
            "Closed event stream ({} record(s) delivered)",
            self.view.delivered_count()
        );
    }

    /// A cheap handle for reading properties from other tasks
    pub fn view(&self) -> EventsManagerView {
        self.view.clone()
    }

    pub fn state(&self) -> StreamState {
        self.view.state()
    }

    pub fn is_open(&self) -> bool {
        self.view.is_open()
    }

    pub fn last_event(&self) -> Option<Arc<Event>> {
        self.view.last_event()
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.view.watched_paths()
    }

    pub fn excluded_paths(&self) -> Vec<PathBuf> {
        self.view.excluded_paths()
    }

    pub fn ignore_sub_directories(&self) -> bool {
        self.view.ignore_sub_directories()
    }

    pub fn since_event_identifier(&self) -> EventIdentifier {
        self.view.since_event_identifier()
    }

    pub fn notification_latency(&self) -> Duration {
        self.view.notification_latency()
    }

    pub fn creation_flags(&self) -> StreamCreationFlags {
        self.view.creation_flags()
    }
}

impl fmt::Debug for EventsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventsManager")
            .field("view", &self.view)
            .field("facility", &self.facility)
            .finish()
    }
}

impl Drop for EventsManager {
    fn drop(&mut self) {
        self.close();
    }
}

fn dispatch_stopped() -> Error {
    Error::Other(anyhow::anyhow!(
        "Dispatch stopped before the flush completed"
    ))
}

/// Builder for EventsManager
///
/// Exactly one of [`observer`](Self::observer) or
/// [`callback`](Self::callback) must be set. Without an explicit context the
/// caller's runtime is used; without an explicit facility the platform's
/// recommended watcher is used.
pub struct EventsManagerBuilder {
    stream: StreamConfigBuilder,
    config: Option<StreamConfig>,
    context: Option<ExecutionContext>,
    facility: Option<Arc<dyn NativeFacility>>,
    observer: Option<ObserverConsumer>,
    callback: Option<CallbackConsumer>,
}

impl EventsManagerBuilder {
    pub fn new<I, P>(watched_paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            stream: StreamConfig::builder(watched_paths),
            config: None,
            context: None,
            facility: None,
            observer: None,
            callback: None,
        }
    }

    pub fn excluded_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.stream = self.stream.excluded_paths(paths);
        self
    }

    pub fn exclude(mut self, path: impl Into<PathBuf>) -> Self {
        self.stream = self.stream.exclude(path);
        self
    }

    pub fn ignore_sub_directories(mut self, ignore: bool) -> Self {
        self.stream = self.stream.ignore_sub_directories(ignore);
        self
    }

    pub fn notification_latency(mut self, latency: Duration) -> Self {
        self.stream = self.stream.notification_latency(latency);
        self
    }

    pub fn since_event_identifier(mut self, since: EventIdentifier) -> Self {
        self.stream = self.stream.since_event_identifier(since);
        self
    }

    pub fn creation_flags(mut self, flags: StreamCreationFlags) -> Self {
        self.stream = self.stream.creation_flags(flags);
        self
    }

    /// Use a prepared configuration; it replaces every stream option above
    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Deliver on another runtime
    pub fn context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn facility(mut self, facility: Arc<dyn NativeFacility>) -> Self {
        self.facility = Some(facility);
        self
    }

    /// Deliver to an observer, held weakly
    pub fn observer<O: EventsObserver + 'static>(mut self, observer: &Arc<O>) -> Self {
        self.observer = Some(ObserverConsumer::new(observer));
        self
    }

    /// Deliver to a closure
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&EventsManagerView, &Event) + Send + Sync + 'static,
    {
        self.callback = Some(CallbackConsumer::new(callback));
        self
    }

    pub fn build(self) -> Result<EventsManager> {
        let consumer: Arc<dyn EventConsumer> = match (self.observer, self.callback) {
            (Some(observer), None) => {
                if !observer.is_alive() {
                    return Err(Error::invalid_configuration(
                        "observer was dropped before the stream opened",
                    ));
                }
                Arc::new(observer)
            }
            (None, Some(callback)) => Arc::new(callback),
            (None, None) => {
                return Err(Error::invalid_configuration(
                    "an observer or a callback is required",
                ))
            }
            (Some(_), Some(_)) => {
                return Err(Error::invalid_configuration(
                    "set either an observer or a callback, not both",
                ))
            }
        };

        let config = match self.config {
            Some(config) => config,
            None => self.stream.build()?,
        };
        let context = match self.context {
            Some(context) => context,
            None => ExecutionContext::current()?,
        };
        let facility = self.facility.unwrap_or_else(native::default_facility);

        EventsManager::open(config, consumer, context, facility)
    }
}
