//! Immutable construction-time snapshot used by revert.

use crate::types::Changes;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

/// Write-once copy of the initial state.
#[derive(Debug)]
pub struct Baseline<K, V> {
    entries: Arc<HashMap<K, V>>,
}

impl<K, V> Clone for Baseline<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Baseline<K, V> {
    pub fn new(entries: Arc<HashMap<K, V>>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &HashMap<K, V> {
        &self.entries
    }

    /// Proposal that restores one key: its baseline value, or removal when
    /// the baseline does not hold it.
    pub fn revert_key(&self, key: K) -> Changes<K, V> {
        let value = self.entries.get(&key).cloned();
        let mut changes = Changes::with_capacity(1);
        changes.insert(key, value);
        changes
    }

    /// Proposal that restores every key present in the baseline or in
    /// `current`.
    pub fn revert_all(&self, current: &HashMap<K, V>) -> Changes<K, V> {
        let keys: HashSet<&K> = self.entries.keys().chain(current.keys()).collect();
        keys.into_iter()
            .map(|key| (key.clone(), self.entries.get(key).cloned()))
            .collect()
    }
}
