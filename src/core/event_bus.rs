//! Pub/Sub Event Bus for decoupled component communication.
//!
//! Architecture:
//! - Components subscribe to event types with callbacks (immediate invocation)
//! - subscribe() returns a [`Subscription`]; dropping it unsubscribes
//! - emit() invokes callbacks immediately AND queues for deferred processing
//! - poll() returns queued events for batch processing in the host loop
//!
//! Each event type is a channel. Callback order: FIFO (first-subscribed,
//! first-called) within same event type. Cross-type order undefined - don't
//! rely on ordering between different event types.
//!
//! Emitting with no subscribers is always fine: the event is only queued.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use log::{trace, warn};

/// Maximum events in queue before oldest are evicted
const MAX_QUEUE_SIZE: usize = 1000;

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

type SubscriberMap = HashMap<TypeId, Vec<(u64, Callback)>>;

/// Boxed event for queue storage
pub type BoxedEvent = Box<dyn Event>;

/// Pub/Sub Event Bus with deferred processing support.
///
/// Two modes of operation:
/// 1. Immediate: subscribe() + emit() triggers callbacks instantly
/// 2. Deferred: emit() also queues events for poll() in the host loop
///
/// Cloning is cheap; clones share subscribers and queue.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<SubscriberMap>>,
    queue: Arc<Mutex<Vec<BoxedEvent>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_types", &self.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .field("queue_len", &self.queue.lock().map(|q| q.len()).unwrap_or(0))
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            queue: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    // ========== Pub/Sub (immediate) ==========

    /// Subscribe to events of type E.
    ///
    /// Callback is invoked immediately when emit() is called, for as long as the
    /// returned [`Subscription`] is alive.
    ///
    /// # Example
    /// ```ignore
    /// let store = Arc::clone(&store);
    /// let _sub = bus.subscribe::<RefreshProduct, _>(move |e| {
    ///     store.mark_stale(EntityKind::Product, e.0);
    /// });
    /// ```
    #[must_use = "dropping the Subscription unsubscribes immediately"]
    pub fn subscribe<E, F>(&self, callback: F) -> Subscription
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<E>();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
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
        trace!("EventBus: subscribed #{} to {}", id, std::any::type_name::<E>());

        Subscription {
            id,
            type_id,
            type_name: std::any::type_name::<E>(),
            subscribers: Arc::downgrade(&self.subscribers),
            active: true,
        }
    }

    /// Emit event: invoke callbacks immediately AND queue for deferred processing.
    pub fn emit<E: Event + Clone>(&self, event: E) {
        dispatch(&self.subscribers, &event);
        enqueue(&self.queue, Box::new(event));
    }

    // ========== Deferred Processing ==========

    /// Poll all queued events for batch processing.
    ///
    /// Returns all events emitted since last poll.
    pub fn poll(&self) -> Vec<BoxedEvent> {
        std::mem::take(&mut *self.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    // ========== Utilities ==========

    /// Number of live subscribers for event type E
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
}

fn dispatch<E: Event>(subscribers: &RwLock<SubscriberMap>, event: &E) {
    // Snapshot callbacks so handlers may (un)subscribe re-entrantly
    let callbacks: Vec<Callback> = match subscribers
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(&TypeId::of::<E>())
    {
        Some(cbs) => cbs.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
        None => return,
    };
    for cb in callbacks {
        cb(event);
    }
}

fn enqueue(queue: &Mutex<Vec<BoxedEvent>>, event: BoxedEvent) {
    let mut queue = queue.lock().unwrap_or_else(|e| e.into_inner());
    if queue.len() >= MAX_QUEUE_SIZE {
        let evict_count = queue.len() / 2;
        warn!("EventBus queue full ({} events), evicting oldest {}", queue.len(), evict_count);
        queue.drain(0..evict_count);
    }
    queue.push(event);
}

/// Lifetime-scoped subscription. Unsubscribes when dropped.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    type_id: TypeId,
    type_name: &'static str,
    subscribers: Weak<RwLock<SubscriberMap>>,
    active: bool,
}

impl Subscription {
    /// Unsubscribe now (same as dropping)
    pub fn cancel(mut self) {
        self.remove();
    }

    pub fn is_active(&self) -> bool {
        self.active && self.subscribers.strong_count() > 0
    }

    fn remove(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        // Bus already gone: nothing to detach from
        let Some(subscribers) = self.subscribers.upgrade() else {
            return;
        };
        let mut map = subscribers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = map.get_mut(&self.type_id) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                map.remove(&self.type_id);
            }
        }
        trace!("EventBus: unsubscribed #{} from {}", self.id, self.type_name);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[derive(Clone, Debug)]
    struct TestEvent { value: i32 }

    #[derive(Clone, Debug)]
    struct OtherEvent { msg: String }

    #[test]
    fn test_subscribe_emit_immediate() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);

        let _sub = bus.subscribe::<TestEvent, _>(move |e| {
            c.fetch_add(e.value, Ordering::SeqCst);
        });

        bus.emit(TestEvent { value: 10 });
        assert_eq!(counter.load(Ordering::SeqCst), 10);

        bus.emit(TestEvent { value: 5 });
        assert_eq!(counter.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn test_emit_without_subscribers_only_queues() {
        let bus = EventBus::new();

        bus.emit(TestEvent { value: 1 });
        bus.emit(TestEvent { value: 2 });
        bus.emit(OtherEvent { msg: "hello".into() });

        let events = bus.poll();
        assert_eq!(events.len(), 3);
        assert_eq!(bus.poll().len(), 0);
    }

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let subs: Vec<Subscription> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                bus.subscribe::<TestEvent, _>(move |_| order.lock().unwrap().push(i))
            })
            .collect();

        bus.emit(TestEvent { value: 0 });
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        drop(subs);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);

        let sub = bus.subscribe::<TestEvent, _>(move |e| {
            c.fetch_add(e.value, Ordering::SeqCst);
        });
        assert!(bus.has_subscribers::<TestEvent>());

        drop(sub);
        assert!(!bus.has_subscribers::<TestEvent>());

        bus.emit(TestEvent { value: 10 });
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        // Event still queued
        assert_eq!(bus.poll().len(), 1);
    }

    #[test]
    fn test_cancel_leaves_other_subscribers() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicI32::new(0));

        let c1 = Arc::clone(&counter);
        let first = bus.subscribe::<TestEvent, _>(move |e| {
            c1.fetch_add(e.value, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&counter);
        let _second = bus.subscribe::<TestEvent, _>(move |e| {
            c2.fetch_add(e.value * 2, Ordering::SeqCst);
        });

        first.cancel();
        bus.emit(TestEvent { value: 10 });
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        assert_eq!(bus.subscriber_count::<TestEvent>(), 1);
    }

    #[test]
    fn test_subscription_outlives_bus() {
        let bus = EventBus::new();
        let sub = bus.subscribe::<TestEvent, _>(|_| {});
        drop(bus);
        assert!(!sub.is_active());
        drop(sub);
    }

    #[test]
    fn test_handler_may_unsubscribe_reentrantly() {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_in = Arc::clone(&slot);

        let sub = bus.subscribe::<TestEvent, _>(move |_| {
            slot_in.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        bus.emit(TestEvent { value: 1 });
        assert!(!bus.has_subscribers::<TestEvent>());
    }

    #[test]
    fn test_downcast() {
        let bus = EventBus::new();
        bus.emit(TestEvent { value: 42 });
        bus.emit(OtherEvent { msg: "x".into() });

        let events = bus.poll();
        assert_eq!(downcast_event::<TestEvent>(&events[0]).map(|e| e.value), Some(42));
        assert_eq!(downcast_event::<OtherEvent>(&events[1]).map(|e| e.msg.as_str()), Some("x"));
        assert!(downcast_event::<OtherEvent>(&events[0]).is_none());
    }
}
