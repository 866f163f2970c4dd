//! External value sources piped into single keys.
//!
//! Each connected source runs on its own worker thread and forwards every
//! received value to the map. Cancellation is cooperative: the worker checks a
//! shared flag under the map's write lock before applying a value, and a cancel
//! channel wakes it when it is idle.

use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Name given to source worker threads.
pub const SOURCE_THREAD_NAME: &str = "observable-map-source";

/// What a worker does after forwarding a value.
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// Cancellation flag shared between the registry and one worker.
#[derive(Clone, Default)]
pub(crate) struct SourceToken(Arc<AtomicBool>);

impl SourceToken {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Registry entry for a connected source.
struct SourceHandle {
    token: SourceToken,
    /// Dropped on cancel to wake the worker.
    _cancel: Sender<()>,
    generation: u64,
}

impl SourceHandle {
    fn cancel(self) {
        self.token.cancel();
    }
}

/// A source that has been registered but whose worker is not yet running.
pub(crate) struct PendingSource {
    pub token: SourceToken,
    pub generation: u64,
    cancel_rx: Receiver<()>,
}

/// Connected sources by key.
pub(crate) struct SourceRegistry<K> {
    sources: Mutex<HashMap<K, SourceHandle>>,
    next_generation: AtomicU64,
}

impl<K: Eq + Hash + Clone> SourceRegistry<K> {
    pub fn new() -> Self {
        Self {
            sources: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Register a source for `key`, cancelling any previous one.
    pub fn register(&self, key: K) -> PendingSource {
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(1);
        let token = SourceToken::default();
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);

        let handle = SourceHandle {
            token: token.clone(),
            _cancel: cancel_tx,
            generation,
        };
        if let Some(previous) = self.sources.lock().insert(key, handle) {
            debug!(generation = previous.generation, "replacing connected source");
            previous.cancel();
        }

        PendingSource {
            token,
            generation,
            cancel_rx,
        }
    }

    /// Cancel the source for `key`. Returns true if one was connected.
    pub fn cancel(&self, key: &K) -> bool {
        match self.sources.lock().remove(key) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every source. Returns how many were connected.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<SourceHandle> = self.sources.lock().drain().map(|(_, h)| h).collect();
        let count = drained.len();
        for handle in drained {
            handle.cancel();
        }
        count
    }

    /// Forget a finished source, unless it has been replaced since.
    pub fn finish(&self, key: &K, generation: u64) {
        let mut sources = self.sources.lock();
        if sources.get(key).map(|h| h.generation) == Some(generation) {
            sources.remove(key);
        }
    }

    pub fn keys(&self) -> Vec<K> {
        self.sources.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sources.lock().len()
    }
}

/// Runs the end hook when the worker exits, including by unwinding.
struct OnEnd<E: FnOnce()>(Option<E>);

impl<E: FnOnce()> Drop for OnEnd<E> {
    fn drop(&mut self) {
        if let Some(on_end) = self.0.take() {
            on_end();
        }
    }
}

/// Start the worker for a registered source.
///
/// `forward` is called for each received value. `on_end` runs once the worker
/// stops for any reason, a panic in `forward` included.
pub(crate) fn spawn_worker<V, F, E>(
    pending: PendingSource,
    source: Receiver<V>,
    mut forward: F,
    on_end: E,
) -> std::io::Result<JoinHandle<()>>
where
    V: Send + 'static,
    F: FnMut(V, &SourceToken) -> Flow + Send + 'static,
    E: FnOnce() + Send + 'static,
{
    let PendingSource {
        token,
        generation,
        cancel_rx,
    } = pending;

    thread::Builder::new()
        .name(SOURCE_THREAD_NAME.to_string())
        .spawn(move || {
            let _on_end = OnEnd(Some(on_end));
            loop {
                select! {
                    recv(cancel_rx) -> _ => break,
                    recv(source) -> msg => match msg {
                        Ok(value) => {
                            if token.is_cancelled() {
                                break;
                            }
                            if let Flow::Stop = forward(value, &token) {
                                break;
                            }
                        }
                        Err(_) => {
                            debug!(generation, "source exhausted");
                            break;
                        }
                    },
                }
            }
        })
}
