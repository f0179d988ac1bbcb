//! Publish/subscribe layered over the durable store.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{error, warn};

use reflow_core_types::RunId;

use crate::model::{NewRunEvent, RunEvent};
use crate::store::{EventQuery, EventsStore};
use crate::EventError;

type Listener = Box<dyn Fn(&RunEvent) + Send + Sync>;

struct Subscriber {
    filter: Option<RunId>,
    listener: Listener,
}

/// Subscription handle; dropping it does not unsubscribe, call
/// [`Subscription::unsubscribe`].
pub struct Subscription {
    id: u64,
    subscribers: Arc<DashMap<u64, Subscriber>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.subscribers.remove(&self.id);
    }
}

/// Event bus: append delegates sequence allocation to the store so `seq`
/// assignment is durable before any broadcast, then fans the committed
/// event out to matching listeners. A faulty listener is caught and logged
/// per listener; it cannot block delivery to others or abort the appender.
pub struct EventBus {
    store: Arc<dyn EventsStore>,
    subscribers: Arc<DashMap<u64, Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new(store: Arc<dyn EventsStore>) -> Self {
        Self {
            store,
            subscribers: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn EventsStore> {
        &self.store
    }

    /// Register a listener, optionally filtered to a single run.
    pub fn subscribe<F>(&self, filter: Option<RunId>, listener: F) -> Subscription
    where
        F: Fn(&RunEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(
            id,
            Subscriber {
                filter,
                listener: Box::new(listener),
            },
        );
        Subscription {
            id,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// Materialize a subscription as an unbounded channel so callers can
    /// await events without holding a callback.
    pub fn subscribe_channel(
        &self,
        filter: Option<RunId>,
    ) -> (mpsc::UnboundedReceiver<RunEvent>, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(filter, move |event| {
            let _ = tx.send(event.clone());
        });
        (rx, subscription)
    }

    /// Commit an event and broadcast it. Listeners only ever observe
    /// events that carry a store-assigned sequence number.
    pub async fn append(&self, input: NewRunEvent) -> Result<RunEvent, EventError> {
        let event = self.store.append(input).await?;

        for entry in self.subscribers.iter() {
            if let Some(filter) = &entry.filter {
                if filter != &event.run_id {
                    continue;
                }
            }
            let result = catch_unwind(AssertUnwindSafe(|| (entry.listener)(&event)));
            if result.is_err() {
                error!(
                    subscriber = entry.key(),
                    kind = %event.kind,
                    "event listener panicked; continuing delivery"
                );
            }
        }

        Ok(event)
    }

    /// Events for a run, ascending by `seq`.
    pub async fn list(&self, query: EventQuery) -> Result<Vec<RunEvent>, EventError> {
        self.store.list(query).await.map_err(|err| {
            warn!(%err, "event list failed");
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunEventKind;
    use crate::store::InMemoryEventsStore;
    use parking_lot::Mutex;

    fn bus() -> EventBus {
        EventBus::new(Arc::new(InMemoryEventsStore::new()))
    }

    #[tokio::test]
    async fn listeners_receive_committed_events_with_seq() {
        let bus = bus();
        let run_id = RunId::new();
        let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let _sub = bus.subscribe(Some(run_id.clone()), move |event| {
            seen_clone.lock().push(event.seq);
        });

        for _ in 0..3 {
            bus.append(NewRunEvent::run(run_id.clone(), RunEventKind::NodeStarted))
                .await
                .unwrap();
        }
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn filter_excludes_other_runs() {
        let bus = bus();
        let watched = RunId::new();
        let other = RunId::new();
        let count = Arc::new(Mutex::new(0usize));

        let count_clone = count.clone();
        let _sub = bus.subscribe(Some(watched.clone()), move |_| {
            *count_clone.lock() += 1;
        });

        bus.append(NewRunEvent::run(other, RunEventKind::RunStarted))
            .await
            .unwrap();
        bus.append(NewRunEvent::run(watched, RunEventKind::RunStarted))
            .await
            .unwrap();
        assert_eq!(*count.lock(), 1);
    }

    #[tokio::test]
    async fn panicking_listener_does_not_block_others() {
        let bus = bus();
        let run_id = RunId::new();
        let delivered = Arc::new(Mutex::new(0usize));

        let _bad = bus.subscribe(None, |_| panic!("boom"));
        let delivered_clone = delivered.clone();
        let _good = bus.subscribe(None, move |_| {
            *delivered_clone.lock() += 1;
        });

        let event = bus
            .append(NewRunEvent::run(run_id, RunEventKind::RunStarted))
            .await
            .unwrap();
        assert_eq!(event.seq, 1);
        assert_eq!(*delivered.lock(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = bus();
        let run_id = RunId::new();
        let count = Arc::new(Mutex::new(0usize));

        let count_clone = count.clone();
        let sub = bus.subscribe(None, move |_| {
            *count_clone.lock() += 1;
        });

        bus.append(NewRunEvent::run(run_id.clone(), RunEventKind::RunStarted))
            .await
            .unwrap();
        sub.unsubscribe();
        bus.append(NewRunEvent::run(run_id, RunEventKind::RunSucceeded))
            .await
            .unwrap();
        assert_eq!(*count.lock(), 1);
    }

    #[tokio::test]
    async fn channel_adapter_delivers_events() {
        let bus = bus();
        let run_id = RunId::new();
        let (mut rx, _sub) = bus.subscribe_channel(Some(run_id.clone()));

        bus.append(NewRunEvent::run(run_id, RunEventKind::RunStarted))
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, RunEventKind::RunStarted);
    }
}
