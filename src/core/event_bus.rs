//! Pub/Sub Event Bus for decoupled component communication.
//!
//! Architecture:
//! - Components subscribe to event types with callbacks (immediate invocation)
//! - emit() invokes callbacks immediately AND queues for deferred processing
//! - poll() returns queued events for batch processing in main loop
//! - subscribe() hands back a [`SubscriptionId`]; unsubscribe(id) removes exactly
//!   that callback and nothing else
//!
//! Callback order: FIFO (first-subscribed, first-called) within same event type.
//! Cross-type order undefined - don't rely on ordering between different event types.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::{trace, warn};
use uuid::Uuid;

use crate::config::MAX_EVENT_QUEUE;

/// Marker trait for events. Events must be Send + Sync + 'static.
pub trait Event: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

// Blanket impl for all qualifying types
impl<T: Any + Send + Sync + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Type-erased callback
type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Boxed event for queue storage
pub type BoxedEvent = Box<dyn Event>;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

type Subscribers = Arc<RwLock<HashMap<TypeId, Vec<(SubscriptionId, Callback)>>>>;
type Queue = Arc<Mutex<Vec<BoxedEvent>>>;

/// Pub/Sub Event Bus with deferred processing support.
///
/// Two modes of operation:
/// 1. Immediate: subscribe() + emit() triggers callbacks instantly
/// 2. Deferred: emit() also queues events for poll() in main loop
#[derive(Clone)]
pub struct EventBus {
    subscribers: Subscribers,
    queue: Queue,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            queue: Arc::new(Mutex::new(Vec::new())),
        }
    }

    // ========== Pub/Sub (immediate) ==========

    /// Subscribe to events of type E.
    ///
    /// Callback is invoked immediately when emit() is called. Callbacks must not
    /// subscribe or unsubscribe on the same bus (the subscriber table is read-locked
    /// while they run).
    ///
    /// # Example
    /// ```ignore
    /// let inbox = Arc::new(Mutex::new(Vec::new()));
    /// let sink = Arc::clone(&inbox);
    /// let id = event_bus.subscribe::<MyEvent, _>(move |e| {
    ///     sink.lock().unwrap().push(e.clone());
    /// });
    /// // ...
    /// event_bus.unsubscribe(id);
    /// ```
    pub fn subscribe<E, F>(&self, callback: F) -> SubscriptionId
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        let type_id = TypeId::of::<E>();
        let wrapped: Callback = Arc::new(move |any: &dyn Any| {
            if let Some(event) = any.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(type_id)
            .or_default()
            .push((id, wrapped));
        trace!("EventBus: {} subscribed to {}", id, std::any::type_name::<E>());
        id
    }

    /// Remove one subscription. Returns false if the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        for cbs in subs.values_mut() {
            if let Some(pos) = cbs.iter().position(|(sid, _)| *sid == id) {
                cbs.remove(pos);
                trace!("EventBus: {} unsubscribed", id);
                return true;
            }
        }
        warn!("EventBus: unsubscribe of unknown {}", id);
        false
    }

    /// Emit event: invoke callbacks immediately AND queue for deferred processing.
    pub fn emit<E: Event + Clone>(&self, event: E) {
        dispatch(&self.subscribers, &self.queue, event, "EventBus");
    }

    // ========== Deferred Processing ==========

    /// Poll all queued events for batch processing.
    pub fn poll(&self) -> Vec<BoxedEvent> {
        std::mem::take(&mut *self.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    // ========== Handle & Utilities ==========

    /// Get an emitter handle for passing to components that only publish.
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter {
            subscribers: Arc::clone(&self.subscribers),
            queue: Arc::clone(&self.queue),
        }
    }

    /// Clear subscribers for type E
    pub fn unsubscribe_all<E: Event>(&self) {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner()).remove(&TypeId::of::<E>());
    }

    /// Number of callbacks registered for event type E
    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Check if there are subscribers for event type E
    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.subscriber_count::<E>() > 0
    }

    /// Check queue length
    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn dispatch<E: Event + Clone>(subscribers: &Subscribers, queue: &Queue, event: E, who: &str) {
    let type_id = TypeId::of::<E>();

    // Snapshot callbacks so a callback may emit further events without holding the lock
    let cbs: Vec<Callback> = subscribers
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(&type_id)
        .map(|v| v.iter().map(|(_, cb)| Arc::clone(cb)).collect())
        .unwrap_or_default();
    for cb in cbs {
        cb(&event);
    }

    // Queue for deferred processing with eviction
    let mut queue = queue.lock().unwrap_or_else(|e| e.into_inner());
    if queue.len() >= MAX_EVENT_QUEUE {
        let evict_count = queue.len() / 2;
        warn!("{} queue full ({} events), evicting oldest {}", who, queue.len(), evict_count);
        queue.drain(0..evict_count);
    }
    queue.push(Box::new(event));
}

/// Lightweight emitter handle.
///
/// Can be cloned and passed around for emitting events.
#[derive(Clone)]
pub struct EventEmitter {
    subscribers: Subscribers,
    queue: Queue,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscriber_types", &self.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .field("queue_len", &self.queue.lock().map(|q| q.len()).unwrap_or(0))
            .finish()
    }
}

impl EventEmitter {
    /// Emit event: invoke callbacks and queue for deferred processing
    pub fn emit<E: Event + Clone>(&self, event: E) {
        dispatch(&self.subscribers, &self.queue, event, "EventEmitter");
    }
}

/// Optional emitter (wraps Option<EventEmitter>), no-op until wired to a bus.
#[derive(Clone, Default, Debug)]
pub struct SharedEmitter {
    inner: Option<EventEmitter>,
}

impl SharedEmitter {
    /// Create a no-op emitter (for components used without an event system)
    pub fn dummy() -> Self {
        Self { inner: None }
    }

    /// Create from EventEmitter
    pub fn from_emitter(emitter: EventEmitter) -> Self {
        Self { inner: Some(emitter) }
    }

    /// Emit event (no-op if dummy)
    pub fn emit<E: Event + Clone>(&self, event: E) {
        if let Some(ref emitter) = self.inner {
            emitter.emit(event);
        }
    }
}

/// Helper: downcast BoxedEvent to concrete type
///
/// IMPORTANT: Must explicitly deref to `dyn Event` before calling `as_any()`.
/// Without explicit deref, the blanket impl `Event for Box<dyn Event>` intercepts
/// the call and returns `&dyn Any` containing `Box<dyn Event>` instead of the
/// original type, causing downcast to always fail.
#[inline]
pub fn downcast_event<E: Event>(event: &BoxedEvent) -> Option<&E> {
    (**event).as_any().downcast_ref::<E>()
}
