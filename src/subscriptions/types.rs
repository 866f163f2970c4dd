//! Subscription types for map updates.

use crate::types::UpdateEvent;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

/// Configuration for the notification bus.
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Per-stream buffer. `None` = unbounded.
    /// With a bound, a stream subscriber whose buffer is full is dropped.
    pub buffer_size: Option<usize>,

    /// Catch panicking callbacks so the remaining subscribers still receive
    /// the event. Default: true
    ///
    /// When false, the panic reaches the writer after the state change has
    /// been applied, and events queued behind the failed one are discarded.
    pub catch_panics: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            buffer_size: None,
            catch_panics: true,
        }
    }
}

/// Key filter for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionFilter<K> {
    /// Keys of interest (None = all keys).
    pub keys: Option<HashSet<K>>,
}

impl<K> Default for SubscriptionFilter<K> {
    fn default() -> Self {
        Self { keys: None }
    }
}

impl<K: Eq + Hash> SubscriptionFilter<K> {
    /// Receive every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Receive events touching any of `keys`, plus resend-all events.
    pub fn keys<I: IntoIterator<Item = K>>(keys: I) -> Self {
        Self {
            keys: Some(keys.into_iter().collect()),
        }
    }

    /// Check if an event should be delivered.
    ///
    /// An empty change set is always delivered.
    pub fn matches<V>(&self, event: &UpdateEvent<K, V>) -> bool {
        match &self.keys {
            None => true,
            Some(keys) => event.is_resend_all() || event.keys().any(|key| keys.contains(key)),
        }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Channel-backed subscription.
///
/// Receives events in publish order. After the bus closes, buffered events are
/// still returned, then receiving reports disconnection.
pub struct EventStream<K, V> {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<UpdateEvent<K, V>>,
}

impl<K, V> EventStream<K, V> {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<UpdateEvent<K, V>, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<UpdateEvent<K, V>, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<UpdateEvent<K, V>, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Blocking iterator that ends when the bus closes.
    pub fn iter(&self) -> crossbeam_channel::Iter<'_, UpdateEvent<K, V>> {
        self.receiver.iter()
    }

    /// Drain events that are already buffered.
    pub fn drain(&self) -> Vec<UpdateEvent<K, V>> {
        self.receiver.try_iter().collect()
    }
}
