//! Notification bus for broadcasting map updates.

use crate::error::{MapError, Result};
use crate::types::UpdateEvent;
use crossbeam_channel::{bounded, unbounded, Sender, TrySendError};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::cell::Cell;
use std::collections::VecDeque;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::types::{BusConfig, EventStream, SubscriptionFilter, SubscriptionId};

/// Callback invoked for every matching event.
pub type Callback<K, V> = Arc<dyn Fn(&UpdateEvent<K, V>) + Send + Sync>;

/// Where a subscription's events go.
enum Sink<K, V> {
    Callback(Callback<K, V>),
    Channel(Sender<UpdateEvent<K, V>>),
}

/// Internal subscription state.
struct Subscription<K, V> {
    id: SubscriptionId,
    filter: SubscriptionFilter<K>,
    sink: Sink<K, V>,
    /// Cleared on unsubscribe, checked before every delivery.
    active: AtomicBool,
}

impl<K, V> Subscription<K, V> {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Resets the dispatching flag even if a callback unwinds. An unwinding
/// callback also discards the queued events.
struct DispatchGuard<'a, K, V> {
    dispatching: &'a Cell<bool>,
    pending: &'a Mutex<VecDeque<UpdateEvent<K, V>>>,
}

impl<K, V> Drop for DispatchGuard<'_, K, V> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let dropped = std::mem::take(&mut *self.pending.lock());
            if !dropped.is_empty() {
                warn!(dropped = dropped.len(), "subscriber panicked, discarding queued events");
            }
        }
        self.dispatching.set(false);
    }
}

/// Broadcasts update events to filtered subscribers.
///
/// Subscribers are kept in registration order. Each publish delivers to a
/// snapshot of the registry, so callbacks may subscribe or unsubscribe freely.
/// A publish made from inside a callback is queued and delivered after the
/// current event, which keeps delivery FIFO for every subscriber.
pub struct NotificationBus<K, V> {
    /// Active subscriptions in registration order.
    subscriptions: RwLock<Vec<Arc<Subscription<K, V>>>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    closed: AtomicBool,
    /// Events waiting for delivery.
    pending: Mutex<VecDeque<UpdateEvent<K, V>>>,
    /// Serializes delivery across threads; re-entrant for callbacks.
    /// Holds whether an outer publish is delivering on the owning thread.
    dispatch: ReentrantMutex<Cell<bool>>,
    config: BusConfig,
}

impl<K, V> NotificationBus<K, V> {
    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn has_subscribers(&self) -> bool {
        self.subscriptions.read().iter().any(|sub| sub.is_active())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<K, V> NotificationBus<K, V>
where
    K: Eq + Hash,
{
    /// Create a new bus.
    pub fn new(config: BusConfig) -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            pending: Mutex::new(VecDeque::new()),
            dispatch: ReentrantMutex::new(Cell::new(false)),
            config,
        }
    }

    /// Register a callback subscriber.
    pub fn subscribe<F>(&self, filter: SubscriptionFilter<K>, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&UpdateEvent<K, V>) + Send + Sync + 'static,
    {
        self.register(filter, Sink::Callback(Arc::new(callback)))
    }

    /// Register a channel subscriber.
    pub fn subscribe_stream(&self, filter: SubscriptionFilter<K>) -> Result<EventStream<K, V>> {
        let (sender, receiver) = match self.config.buffer_size {
            Some(size) => bounded(size),
            None => unbounded(),
        };
        let id = self.register(filter, Sink::Channel(sender))?;
        Ok(EventStream { id, receiver })
    }

    fn register(&self, filter: SubscriptionFilter<K>, sink: Sink<K, V>) -> Result<SubscriptionId> {
        let mut subs = self.subscriptions.write();
        // Checked under the registry lock so teardown cannot miss a late subscriber.
        if self.is_closed() {
            return Err(MapError::ClosedStream);
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!(subscription = %id, filtered = filter.keys.is_some(), "subscribed");
        subs.push(Arc::new(Subscription {
            id,
            filter,
            sink,
            active: AtomicBool::new(true),
        }));
        Ok(id)
    }

    /// Unsubscribe. Returns true if a live subscription was removed.
    ///
    /// Takes effect for the next delivery, including deliveries of the event
    /// currently being dispatched.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        match subs.iter().position(|sub| sub.id == id) {
            Some(index) => {
                let sub = subs.remove(index);
                sub.deactivate();
                debug!(subscription = %id, "unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Deliver an event to every matching subscriber.
    pub fn publish(&self, event: UpdateEvent<K, V>) -> Result<()> {
        let dispatching = self.dispatch.lock();
        if self.is_closed() {
            return Err(MapError::ClosedStream);
        }

        self.pending.lock().push_back(event);
        if dispatching.get() {
            trace!("queued re-entrant event");
            return Ok(());
        }

        self.drain(&dispatching);
        Ok(())
    }

    /// Close the bus.
    ///
    /// Queued events are delivered first. Afterwards every subscription is
    /// removed, stream receivers see disconnection, and publish/subscribe fail
    /// with `ClosedStream`. Idempotent. Called from inside a callback, the
    /// teardown runs once the in-flight dispatch has drained.
    pub fn close(&self) {
        let dispatching = self.dispatch.lock();
        {
            let _subs = self.subscriptions.write();
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
        }
        debug!("closing notification bus");

        if !dispatching.get() {
            self.drain(&dispatching);
        }
    }

    fn drain(&self, dispatching: &Cell<bool>) {
        {
            dispatching.set(true);
            let _guard = DispatchGuard {
                dispatching,
                pending: &self.pending,
            };
            loop {
                let next = self.pending.lock().pop_front();
                let Some(event) = next else { break };
                self.dispatch_one(&event);
            }
        }

        if self.is_closed() {
            self.teardown();
        }
    }

    fn dispatch_one(&self, event: &UpdateEvent<K, V>) {
        let snapshot: Vec<Arc<Subscription<K, V>>> = self.subscriptions.read().clone();
        trace!(
            subscribers = snapshot.len(),
            changed = event.changed.len(),
            "dispatching event"
        );

        let mut to_remove = Vec::new();
        for sub in &snapshot {
            if !sub.is_active() || !sub.filter.matches(event) {
                continue;
            }
            match &sub.sink {
                Sink::Callback(callback) => self.invoke(sub.id, callback, event),
                Sink::Channel(sender) => match sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(subscription = %sub.id, "stream buffer full, dropping subscriber");
                        to_remove.push(sub.id);
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        debug!(subscription = %sub.id, "stream receiver gone");
                        to_remove.push(sub.id);
                    }
                },
            }
        }

        for id in to_remove {
            self.unsubscribe(id);
        }
    }

    fn invoke(&self, id: SubscriptionId, callback: &Callback<K, V>, event: &UpdateEvent<K, V>) {
        if !self.config.catch_panics {
            callback(event);
            return;
        }

        let result = catch_unwind(AssertUnwindSafe(|| callback(event)));
        if result.is_err() {
            warn!(subscription = %id, "subscriber callback panicked");
        }
    }

    fn teardown(&self) {
        let subs = std::mem::take(&mut *self.subscriptions.write());
        for sub in &subs {
            sub.deactivate();
        }
        debug!(dropped = subs.len(), "notification bus closed");
    }
}

impl<K: Eq + Hash, V> Default for NotificationBus<K, V> {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}
