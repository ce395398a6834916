//! Serialized delivery of records to the consumer
//!
//! One task per manager drains a FIFO of batches and flush barriers. A
//! barrier is acknowledged only after every batch queued before it has been
//! delivered, which is what makes synchronous flushes synchronous.

use crate::manager::EventsManagerView;
use fsstream_core::event::Event;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// Receives every delivered record, one at a time, in identifier order
pub trait EventConsumer: Send + Sync {
    fn on_event(&self, manager: &EventsManagerView, event: &Event);
}

/// Observer-style consumer
///
/// Managers hold observers weakly; an observer dropped while the stream is
/// open simply stops receiving records.
pub trait EventsObserver: Send + Sync {
    fn event_occurred(&self, manager: &EventsManagerView, event: &Event);
}

/// Delivers to a weakly held [`EventsObserver`]
pub struct ObserverConsumer {
    observer: Weak<dyn EventsObserver>,
}

impl ObserverConsumer {
    pub fn new<O: EventsObserver + 'static>(observer: &Arc<O>) -> Self {
        let observer: Arc<dyn EventsObserver> = observer.clone();
        Self {
            observer: Arc::downgrade(&observer),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.observer.strong_count() > 0
    }
}

impl EventConsumer for ObserverConsumer {
    fn on_event(&self, manager: &EventsManagerView, event: &Event) {
        match self.observer.upgrade() {
            Some(observer) => observer.event_occurred(manager, event),
            None => trace!("Observer dropped; skipping {}", event.identifier()),
        }
    }
}

type Callback = dyn Fn(&EventsManagerView, &Event) + Send + Sync;

/// Delivers to a closure
pub struct CallbackConsumer {
    callback: Box<Callback>,
}

impl CallbackConsumer {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&EventsManagerView, &Event) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl EventConsumer for CallbackConsumer {
    fn on_event(&self, manager: &EventsManagerView, event: &Event) {
        (self.callback)(manager, event)
    }
}

pub(crate) enum DispatchMessage {
    Batch { generation: u64, events: Vec<Event> },
    Barrier(oneshot::Sender<()>),
}

/// Producer side of the dispatch queue
#[derive(Clone)]
pub struct DispatchSender {
    tx: mpsc::UnboundedSender<DispatchMessage>,
}

impl DispatchSender {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<DispatchMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a filtered batch; false once dispatch has stopped
    pub(crate) fn send_batch(&self, generation: u64, events: Vec<Event>) -> bool {
        self.tx
            .send(DispatchMessage::Batch { generation, events })
            .is_ok()
    }

    /// Queue a barrier behind everything already sent
    pub(crate) fn barrier(&self) -> Option<oneshot::Receiver<()>> {
        let (ack, done) = oneshot::channel();
        self.tx.send(DispatchMessage::Barrier(ack)).ok()?;
        Some(done)
    }
}

/// Drains the dispatch queue on the manager's execution context
pub(crate) struct DispatchEngine {
    rx: mpsc::UnboundedReceiver<DispatchMessage>,
    consumer: Arc<dyn EventConsumer>,
    view: EventsManagerView,
}

impl DispatchEngine {
    pub(crate) fn new(
        consumer: Arc<dyn EventConsumer>,
        view: EventsManagerView,
    ) -> (Self, DispatchSender) {
        let (sender, rx) = DispatchSender::channel();
        (Self { rx, consumer, view }, sender)
    }

    pub(crate) async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            match message {
                DispatchMessage::Batch { generation, events } => {
                    self.deliver(generation, events);
                }
                DispatchMessage::Barrier(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        debug!("Dispatch engine stopped");
    }

    fn deliver(&self, generation: u64, events: Vec<Event>) {
        let state = self.view.shared();
        if !state.accepts(generation) {
            debug!(
                "Discarding batch of {} from generation {}",
                events.len(),
                generation
            );
            return;
        }

        for event in events {
            if let Some(last) = state.last_event_identifier() {
                if event.identifier() <= last {
                    warn!(
                        "Dropping out-of-order record {} (last delivered {})",
                        event.identifier(),
                        last
                    );
                    continue;
                }
            }

            let event = Arc::new(event);
            state.record_delivery(Arc::clone(&event));
            self.consumer.on_event(&self.view, &event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ManagerState;
    use fsstream_core::{EventFlags, EventIdentifier, StreamConfig};
    use parking_lot::Mutex;

    struct Recorder {
        seen: Mutex<Vec<(u64, Option<u64>)>>,
    }

    impl EventsObserver for Recorder {
        fn event_occurred(&self, manager: &EventsManagerView, event: &Event) {
            let last = manager.last_event().map(|e| e.identifier().value());
            self.seen.lock().push((event.identifier().value(), last));
        }
    }

    fn event(id: u64) -> Event {
        Event::new(EventIdentifier::new(id), "/tmp/a/x", EventFlags::ITEM_MODIFIED)
    }

    fn open_view() -> EventsManagerView {
        let config = StreamConfig::builder(["/tmp/a"])
            .build()
            .expect("valid configuration");
        let state = Arc::new(ManagerState::new(config, "test"));
        state.begin_generation();
        state.mark_open();
        EventsManagerView::new(state)
    }

    #[tokio::test]
    async fn test_delivers_in_order_and_updates_last_event_first() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let view = open_view();
        let (engine, sender) =
            DispatchEngine::new(Arc::new(ObserverConsumer::new(&recorder)), view.clone());
        let task = tokio::spawn(engine.run());

        assert!(sender.send_batch(1, vec![event(10), event(11)]));
        assert!(sender.send_batch(1, vec![event(11), event(5), event(12)]));
        sender
            .barrier()
            .expect("dispatch running")
            .await
            .expect("barrier acknowledged");

        assert_eq!(
            *recorder.seen.lock(),
            vec![(10, Some(10)), (11, Some(11)), (12, Some(12))]
        );
        assert_eq!(view.delivered_count(), 3);

        drop(sender);
        task.await.expect("engine exits");
    }

    #[tokio::test]
    async fn test_stale_generation_discarded() {
        let count = Arc::new(Mutex::new(0usize));
        let seen = Arc::clone(&count);
        let view = open_view();
        let (engine, sender) = DispatchEngine::new(
            Arc::new(CallbackConsumer::new(move |_, _| *seen.lock() += 1)),
            view.clone(),
        );
        tokio::spawn(engine.run());

        view.shared().begin_generation();
        sender.send_batch(1, vec![event(1)]);
        sender.send_batch(2, vec![event(2)]);
        sender
            .barrier()
            .expect("dispatch running")
            .await
            .expect("barrier acknowledged");

        assert_eq!(*count.lock(), 1);
        assert_eq!(
            view.last_event().map(|e| e.identifier()),
            Some(EventIdentifier::new(2))
        );
    }

    #[tokio::test]
    async fn test_dropped_observer_receives_nothing() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let consumer = ObserverConsumer::new(&recorder);
        assert!(consumer.is_alive());
        drop(recorder);
        assert!(!consumer.is_alive());

        let view = open_view();
        let (engine, sender) = DispatchEngine::new(Arc::new(consumer), view.clone());
        tokio::spawn(engine.run());

        sender.send_batch(1, vec![event(1)]);
        sender
            .barrier()
            .expect("dispatch running")
            .await
            .expect("barrier acknowledged");
        assert_eq!(view.delivered_count(), 1);
    }
}
