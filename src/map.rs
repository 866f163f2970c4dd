//! The observable map: a key-value container that publishes every change.

use crate::error::{MapError, Result};
use crate::sources::{spawn_worker, Flow, SourceRegistry};
use crate::state::{apply_diff, compute_diff, Baseline, TypeRegistry};
use crate::subscriptions::{
    BusConfig, EventStream, NotificationBus, SubscriptionFilter, SubscriptionId,
};
use crate::types::{Changes, Typed, UpdateEvent, ValueKind};
use crossbeam_channel::Receiver;
use parking_lot::{ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Map configuration.
#[derive(Clone, Debug, Default)]
pub struct MapConfig {
    /// Pin each key's value kind on first write and reject drift.
    pub enforce_types: bool,

    /// Notification bus settings.
    pub bus: BusConfig,
}

/// Live entries plus the type pins, swapped together on every write.
struct MapState<K, V> {
    entries: Arc<HashMap<K, V>>,
    /// Present iff type enforcement is enabled.
    types: Option<TypeRegistry<K>>,
}

struct Shared<K, V> {
    state: RwLock<MapState<K, V>>,
    baseline: Baseline<K, V>,
    bus: NotificationBus<K, V>,
    sources: SourceRegistry<K>,
    /// Serializes writers. Re-entrant so subscriber callbacks may write.
    write_lock: ReentrantMutex<()>,
}

/// An observable key-value map.
///
/// Every write is diffed against the current state; when something actually
/// changed, the state is replaced with a new snapshot and subscribers receive
/// an [`UpdateEvent`] with the changed entries and the before/after snapshots.
///
/// Cloning an `ObservableMap` creates another handle to the **same** map.
///
/// # Example
///
/// ```ignore
/// use observable_map::{ObservableMap, SubscriptionFilter};
///
/// let map = ObservableMap::from_map([("counter1".to_string(), 0)].into());
/// map.subscribe(|event| println!("changed: {:?}", event.changed))?;
///
/// map.set("counter2".to_string(), 10)?;
/// map.update_all(|_, v| v + 5)?;
/// ```
pub struct ObservableMap<K, V> {
    shared: Arc<Shared<K, V>>,
}

// Manual Clone: shares the same Arc.
impl<K, V> Clone for ObservableMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, V> ObservableMap<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + PartialEq + Typed + Debug + Send + Sync + 'static,
{
    // --- Construction ---

    /// Create an empty map.
    pub fn new() -> Self {
        Self::with_config(MapConfig::default(), HashMap::new())
    }

    /// Create a map whose initial state and baseline are `initial`.
    pub fn from_map(initial: HashMap<K, V>) -> Self {
        Self::with_config(MapConfig::default(), initial)
    }

    /// Create a map that enforces per-key value kinds.
    ///
    /// Kinds of the initial entries are pinned immediately.
    pub fn type_safe(initial: Option<HashMap<K, V>>) -> Self {
        Self::with_config(
            MapConfig {
                enforce_types: true,
                ..Default::default()
            },
            initial.unwrap_or_default(),
        )
    }

    /// Create a map with explicit configuration.
    pub fn with_config(config: MapConfig, initial: HashMap<K, V>) -> Self {
        let entries = Arc::new(initial);
        let types = config
            .enforce_types
            .then(|| TypeRegistry::seeded(entries.iter()));

        debug!(
            entries = entries.len(),
            type_safe = config.enforce_types,
            "observable map created"
        );

        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(MapState {
                    entries: Arc::clone(&entries),
                    types,
                }),
                baseline: Baseline::new(entries),
                bus: NotificationBus::new(config.bus),
                sources: SourceRegistry::new(),
                write_lock: ReentrantMutex::new(()),
            }),
        }
    }

    // --- Reads ---

    /// Get a copy of the value for `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.shared.state.read().entries.get(key).cloned()
    }

    /// The current state as a shared immutable snapshot.
    pub fn snapshot(&self) -> Arc<HashMap<K, V>> {
        Arc::clone(&self.shared.state.read().entries)
    }

    /// Owned copy of the current state.
    pub fn to_plain_map(&self) -> HashMap<K, V> {
        (*self.snapshot()).clone()
    }

    /// Owned copy of the construction-time state.
    pub fn baseline(&self) -> HashMap<K, V> {
        self.shared.baseline.entries().clone()
    }

    pub fn keys(&self) -> Vec<K> {
        self.snapshot().keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.snapshot().values().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(K, V)> {
        self.snapshot()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shared.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_not_empty(&self) -> bool {
        !self.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.shared.state.read().entries.contains_key(key)
    }

    pub fn contains_value(&self, value: &V) -> bool {
        self.shared.state.read().entries.values().any(|v| v == value)
    }

    // --- Type enforcement ---

    pub fn is_type_safe(&self) -> bool {
        self.shared.state.read().types.is_some()
    }

    /// Kind pinned for `key`, if enforcement is on and the key has been pinned.
    pub fn pinned_type(&self, key: &K) -> Option<ValueKind> {
        self.shared
            .state
            .read()
            .types
            .as_ref()
            .and_then(|types| types.get(key))
    }

    /// Declare the kind of `key` before any value is written.
    ///
    /// Fails with `UnsupportedOperation` when the map does not enforce types.
    pub fn pin_type(&self, key: K, kind: ValueKind) -> Result<()> {
        let _write = self.shared.write_lock.lock();
        self.ensure_open()?;

        let mut state = self.shared.state.write();
        match state.types.as_mut() {
            Some(types) => types.pin(key, kind),
            None => Err(MapError::UnsupportedOperation(
                "value types cannot be pinned on a map without type enforcement".to_string(),
            )),
        }
    }

    // --- Writes ---

    /// Set `key` to `value`.
    pub fn set(&self, key: K, value: V) -> Result<()> {
        let mut changes = Changes::with_capacity(1);
        changes.insert(key, Some(value));
        self.commit(changes)
    }

    /// Set several entries in one update.
    pub fn set_all<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.commit(entries.into_iter().map(|(k, v)| (k, Some(v))).collect())
    }

    /// Apply a partial update in which `None` removes a key.
    pub fn patch(&self, changes: Changes<K, V>) -> Result<()> {
        self.commit(changes)
    }

    /// Remove `key`, returning its previous value.
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        let _write = self.shared.write_lock.lock();
        self.ensure_open()?;

        let previous = self.get(key);
        if previous.is_some() {
            let mut changes = Changes::with_capacity(1);
            changes.insert(key.clone(), None);
            self.commit(changes)?;
        }
        Ok(previous)
    }

    /// Remove every entry for which `predicate` returns true.
    pub fn remove_where<P>(&self, mut predicate: P) -> Result<()>
    where
        P: FnMut(&K, &V) -> bool,
    {
        let _write = self.shared.write_lock.lock();
        self.ensure_open()?;

        let changes = self
            .snapshot()
            .iter()
            .filter(|(k, v)| predicate(*k, *v))
            .map(|(k, _)| (k.clone(), None))
            .collect();
        self.commit(changes)
    }

    /// Replace the value of `key` with `f(current)`.
    ///
    /// Fails with `MissingAbsentHandler` when the key is absent.
    pub fn update<F>(&self, key: K, f: F) -> Result<V>
    where
        F: FnOnce(&V) -> V,
    {
        self.update_with(key, f, None::<fn() -> V>)
    }

    /// Replace the value of `key` with `f(current)`, or insert `if_absent()`
    /// when the key is absent.
    pub fn update_or_insert_with<F, G>(&self, key: K, f: F, if_absent: G) -> Result<V>
    where
        F: FnOnce(&V) -> V,
        G: FnOnce() -> V,
    {
        self.update_with(key, f, Some(if_absent))
    }

    fn update_with<F, G>(&self, key: K, f: F, if_absent: Option<G>) -> Result<V>
    where
        F: FnOnce(&V) -> V,
        G: FnOnce() -> V,
    {
        let _write = self.shared.write_lock.lock();
        self.ensure_open()?;

        let value = match (self.get(&key), if_absent) {
            (Some(current), _) => f(&current),
            (None, Some(if_absent)) => if_absent(),
            (None, None) => {
                return Err(MapError::MissingAbsentHandler {
                    key: format!("{:?}", key),
                })
            }
        };
        self.set(key, value.clone())?;
        Ok(value)
    }

    /// Replace every value with `f(key, value)` in one update.
    pub fn update_all<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&K, &V) -> V,
    {
        let _write = self.shared.write_lock.lock();
        self.ensure_open()?;

        let changes = self
            .snapshot()
            .iter()
            .map(|(k, v)| (k.clone(), Some(f(k, v))))
            .collect();
        self.commit(changes)
    }

    /// Remove every entry in one update.
    pub fn clear(&self) -> Result<()> {
        let _write = self.shared.write_lock.lock();
        self.ensure_open()?;

        let changes = self.snapshot().keys().map(|k| (k.clone(), None)).collect();
        self.commit(changes)
    }

    // --- Revert ---

    /// Restore `key` to its baseline value, removing it if the baseline
    /// does not hold it.
    pub fn revert(&self, key: K) -> Result<()> {
        self.commit(self.shared.baseline.revert_key(key))
    }

    /// Restore the whole map to its baseline in one update.
    pub fn revert_all(&self) -> Result<()> {
        let _write = self.shared.write_lock.lock();
        self.ensure_open()?;

        let changes = self.shared.baseline.revert_all(&self.snapshot());
        self.commit(changes)
    }

    /// The single write path: diff, type check, swap state, publish.
    fn commit(&self, proposal: Changes<K, V>) -> Result<()> {
        let _write = self.shared.write_lock.lock();
        self.ensure_open()?;

        let (diff, before, after) = {
            let mut guard = self.shared.state.write();
            let state = &mut *guard;

            let diff = compute_diff(proposal, &state.entries);
            if diff.is_empty() {
                return Ok(());
            }

            if let Some(types) = state.types.as_mut() {
                let new_pins = types.check(&diff)?;
                types.commit(new_pins);
            }

            let before = Arc::clone(&state.entries);
            let mut next = (*before).clone();
            apply_diff(&mut next, &diff);
            let after = Arc::new(next);
            state.entries = Arc::clone(&after);
            (diff, before, after)
        };

        trace!(changed = diff.len(), entries = after.len(), "map updated");
        self.publish(UpdateEvent::new(diff, after, before))
    }

    fn publish(&self, event: UpdateEvent<K, V>) -> Result<()> {
        if !self.shared.bus.has_subscribers() {
            return Ok(());
        }
        self.shared.bus.publish(event)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.bus.is_closed() {
            return Err(MapError::ClosedStream);
        }
        Ok(())
    }

    // --- Streaming ---

    /// Subscribe to every update.
    pub fn subscribe<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&UpdateEvent<K, V>) + Send + Sync + 'static,
    {
        self.subscribe_with(SubscriptionFilter::all(), callback)
    }

    /// Subscribe to updates touching any of `keys`, plus resend-all events.
    pub fn subscribe_keys<I, F>(&self, keys: I, callback: F) -> Result<SubscriptionId>
    where
        I: IntoIterator<Item = K>,
        F: Fn(&UpdateEvent<K, V>) + Send + Sync + 'static,
    {
        self.subscribe_with(SubscriptionFilter::keys(keys), callback)
    }

    pub fn subscribe_with<F>(
        &self,
        filter: SubscriptionFilter<K>,
        callback: F,
    ) -> Result<SubscriptionId>
    where
        F: Fn(&UpdateEvent<K, V>) + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(filter, callback)
    }

    /// Subscribe through a channel.
    pub fn subscribe_stream(&self, filter: SubscriptionFilter<K>) -> Result<EventStream<K, V>> {
        self.shared.bus.subscribe_stream(filter)
    }

    /// A new unfiltered stream. Every stream receives every event.
    pub fn as_shared_stream(&self) -> Result<EventStream<K, V>> {
        self.subscribe_stream(SubscriptionFilter::all())
    }

    /// Stop delivery to a subscription. Idempotent.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.bus.unsubscribe(id)
    }

    pub fn has_subscribers(&self) -> bool {
        self.shared.bus.has_subscribers()
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.bus.subscription_count()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.bus.is_closed()
    }

    /// Close the map.
    ///
    /// Disconnects all sources, flushes queued events and removes every
    /// subscription. Later writes, resends and subscribes fail with
    /// `ClosedStream`; reads keep working. Idempotent.
    pub fn close(&self) {
        let _write = self.shared.write_lock.lock();
        if self.shared.bus.is_closed() {
            return;
        }
        self.shared.sources.cancel_all();
        self.shared.bus.close();
    }

    /// Re-emit the current value of `key` (or its absence).
    ///
    /// `before` and `after` are both the current state.
    pub fn resend(&self, key: K) -> Result<()> {
        let _write = self.shared.write_lock.lock();
        self.ensure_open()?;

        let state = self.snapshot();
        let mut changed = Changes::with_capacity(1);
        changed.insert(key.clone(), state.get(&key).cloned());
        trace!(key = ?key, "resending key");
        self.publish(UpdateEvent::new(changed, Arc::clone(&state), state))
    }

    /// Emit an event with an empty change set and the current state.
    ///
    /// Filtered subscribers receive it too.
    pub fn resend_all(&self) -> Result<()> {
        let _write = self.shared.write_lock.lock();
        self.ensure_open()?;

        trace!("resending all");
        self.publish(UpdateEvent::resend_all(self.snapshot()))
    }

    // --- External sources ---

    /// Pipe every value received from `source` into `set(key, value)`.
    ///
    /// Runs on a worker thread until the source disconnects, the key is
    /// disconnected, the map is closed, or every map handle is dropped.
    /// Connecting a key that already has a source replaces it.
    pub fn connect_source(&self, key: K, source: Receiver<V>) -> Result<()> {
        let _write = self.shared.write_lock.lock();
        self.ensure_open()?;

        let pending = self.shared.sources.register(key.clone());
        let generation = pending.generation;
        let forward_shared = Arc::downgrade(&self.shared);
        let end_shared: Weak<Shared<K, V>> = Arc::downgrade(&self.shared);
        let forward_key = key.clone();
        let end_key = key.clone();

        let spawned = spawn_worker(
            pending,
            source,
            move |value, token| {
                let Some(shared) = forward_shared.upgrade() else {
                    return Flow::Stop;
                };
                let map = ObservableMap { shared };
                let _write = map.shared.write_lock.lock();
                if token.is_cancelled() {
                    return Flow::Stop;
                }
                match map.set(forward_key.clone(), value) {
                    Ok(()) => Flow::Continue,
                    Err(MapError::ClosedStream) => Flow::Stop,
                    Err(e) => {
                        warn!(key = ?forward_key, error = %e, "source value rejected");
                        Flow::Continue
                    }
                }
            },
            move || {
                if let Some(shared) = end_shared.upgrade() {
                    shared.sources.finish(&end_key, generation);
                }
            },
        );

        match spawned {
            Ok(_) => {
                debug!(key = ?key, generation, "source connected");
                Ok(())
            }
            Err(e) => {
                self.shared.sources.finish(&key, generation);
                Err(e.into())
            }
        }
    }

    /// Stop consuming the source connected to `key`.
    ///
    /// No value from that source is applied after this returns. Returns true
    /// if a source was connected.
    pub fn disconnect_source(&self, key: &K) -> bool {
        let _write = self.shared.write_lock.lock();
        let cancelled = self.shared.sources.cancel(key);
        if cancelled {
            debug!(key = ?key, "source disconnected");
        }
        cancelled
    }

    /// Stop every connected source. Returns how many were connected.
    pub fn disconnect_all_sources(&self) -> usize {
        let _write = self.shared.write_lock.lock();
        let count = self.shared.sources.cancel_all();
        debug!(count, "all sources disconnected");
        count
    }

    /// Keys that currently have a connected source.
    pub fn connected_sources(&self) -> Vec<K> {
        self.shared.sources.keys()
    }

    pub fn source_count(&self) -> usize {
        self.shared.sources.len()
    }
}

impl<K, V> Default for ObservableMap<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + PartialEq + Typed + Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Debug, V: Debug> fmt::Display for ObservableMap<K, V> {
    /// Renders `{k: v, ...}` with keys ordered by their debug text.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = Arc::clone(&self.shared.state.read().entries);
        let mut entries: Vec<(String, &V)> = snapshot
            .iter()
            .map(|(k, v)| (format!("{:?}", k), v))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        f.write_str("{")?;
        for (i, (key, value)) in entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {:?}", key, value)?;
        }
        f.write_str("}")
    }
}

impl<K: Debug + Eq + Hash, V: Debug> Debug for ObservableMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("ObservableMap")
            .field("entries", &*state.entries)
            .field("type_safe", &state.types.is_some())
            .field("closed", &self.shared.bus.is_closed())
            .finish()
    }
}
