//! Typed, synchronous publish/subscribe event bus.
//!
//! Producers (camera pipeline, microphone pipeline, the fusion engine itself)
//! call [`EventBus::publish`] from whatever thread they run on.  The bus
//! records the event in a bounded history and then invokes every handler
//! registered for the event's [`EventType`] **on the calling thread**, in
//! registration order.
//!
//! # Routing
//!
//! Traffic is partitioned by [`EventType`]:
//!
//! | Lane | Typical traffic |
//! |---|---|
//! | `GazeChanged`, `GestureDetected`, `HeadPoseChanged` | Camera classifiers |
//! | `SpeechRecognized`, `IntentClassified` | ASR / NLU |
//! | `DistractionDetected`, `AttentionConfirmed`, `InteractionCompleted` | Fusion engine output |
//! | `ScenarioStarted`, `ScenarioEnded` | Session lifecycle |
//!
//! # Fault isolation
//!
//! A handler that returns `Err` or panics is logged and skipped; the remaining
//! handlers still run and the producer thread never observes the failure.
//!
//! # Re-entrancy
//!
//! No internal lock is held while handlers run, so a handler may publish
//! further events (the fusion engine publishes its decisions from inside its
//! own handler).

use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cabinfuse_types::{CabinError, EventType, ModalityEvent, ModalityType};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{error, instrument, trace, warn};

/// Default number of events retained in the bus history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Callback invoked for every published event of a subscribed type.
pub type EventHandler = Arc<dyn Fn(&Arc<ModalityEvent>) -> Result<(), CabinError> + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]; pass it back to
/// [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handler: EventHandler,
}

struct BusInner {
    subscribers: RwLock<HashMap<EventType, Vec<Subscription>>>,
    history: Mutex<VecDeque<Arc<ModalityEvent>>>,
    capacity: usize,
    next_id: AtomicU64,
}

/// Shared event bus.  Clone it cheaply – all clones share the same
/// subscriber table and history.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("history_len", &self.history_len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

impl EventBus {
    /// Create a bus retaining at most `capacity` events of history.
    ///
    /// A capacity of zero is bumped to one so the most recent event is always
    /// observable.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                history: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Subscription management
    // -----------------------------------------------------------------------

    /// Register `handler` for every future event of `event_type`.
    ///
    /// Handlers for the same type are invoked in registration order.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> SubscriptionId
    where
        F: Fn(&Arc<ModalityEvent>) -> Result<(), CabinError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .subscribers
            .write()
            .entry(event_type)
            .or_default()
            .push(Subscription {
                id,
                handler: Arc::new(handler),
            });
        id
    }

    /// Remove a previously registered handler.
    ///
    /// Returns `false` when `id` is not subscribed to `event_type`.
    pub fn unsubscribe(&self, event_type: EventType, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.write();
        let Some(list) = subscribers.get_mut(&event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(&event_type);
        }
        removed
    }

    // -----------------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------------

    /// Record `event` in the history and dispatch it to every handler
    /// subscribed to its type.
    ///
    /// Returns the number of handlers that completed successfully.  Having no
    /// subscribers is a normal condition and yields `0`.
    pub fn publish(&self, event: ModalityEvent) -> usize {
        self.publish_shared(Arc::new(event))
    }

    /// Like [`publish`][Self::publish] for an event that is already shared.
    #[instrument(level = "trace", skip_all, fields(event_type = %event.event_type(), modality = %event.modality))]
    pub fn publish_shared(&self, event: Arc<ModalityEvent>) -> usize {
        let event_type = event.event_type();

        {
            let mut history = self.inner.history.lock();
            history.push_back(Arc::clone(&event));
            while history.len() > self.inner.capacity {
                history.pop_front();
            }
        }

        // Snapshot the handler list so no lock is held while user code runs.
        let handlers: Vec<(SubscriptionId, EventHandler)> = self
            .inner
            .subscribers
            .read()
            .get(&event_type)
            .map(|list| list.iter().map(|s| (s.id, Arc::clone(&s.handler))).collect())
            .unwrap_or_default();

        trace!(event_type = %event_type, handlers = handlers.len(), "dispatching event");

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(event_type = %event_type, subscription = id.0, error = %e, "event handler failed");
                }
                Err(panic) => {
                    error!(
                        event_type = %event_type,
                        subscription = id.0,
                        panic = %panic_message(panic.as_ref()),
                        "event handler panicked"
                    );
                }
            }
        }
        delivered
    }

    // -----------------------------------------------------------------------
    // History queries
    // -----------------------------------------------------------------------

    /// Events published within `window` of now, oldest first, optionally
    /// filtered by type and modality.
    pub fn recent_events(
        &self,
        event_type: Option<EventType>,
        modality: Option<ModalityType>,
        window: Duration,
    ) -> Vec<Arc<ModalityEvent>> {
        self.recent_events_at(event_type, modality, window, Utc::now())
    }

    /// [`recent_events`][Self::recent_events] evaluated against an explicit
    /// `now`.
    ///
    /// Timestamps only rise per modality, so the whole history is filtered
    /// and the result sorted by timestamp; publish order breaks ties.
    pub fn recent_events_at(
        &self,
        event_type: Option<EventType>,
        modality: Option<ModalityType>,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Vec<Arc<ModalityEvent>> {
        let window = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
        let mut recent: Vec<Arc<ModalityEvent>> = self
            .inner
            .history
            .lock()
            .iter()
            .filter(|e| now.signed_duration_since(e.timestamp) <= window)
            .filter(|e| event_type.is_none_or(|t| t == e.event_type()))
            .filter(|e| modality.is_none_or(|m| m == e.modality))
            .cloned()
            .collect();
        recent.sort_by_key(|e| e.timestamp);
        recent
    }

    /// Total number of registered handlers across all event types.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().values().map(Vec::len).sum()
    }

    pub fn history_len(&self) -> usize {
        self.inner.history.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
