//! Change computation between a proposed update and the current state.

use crate::types::Changes;
use std::collections::HashMap;
use std::hash::Hash;

/// Reduce a proposal to the entries that actually change `current`.
///
/// A `Some(v)` entry survives when the key is missing or holds a value not
/// equal to `v`. A `None` entry survives only when the key exists. Keys not
/// named in the proposal are untouched.
pub fn compute_diff<K, V>(proposal: Changes<K, V>, current: &HashMap<K, V>) -> Changes<K, V>
where
    K: Eq + Hash,
    V: PartialEq,
{
    proposal
        .into_iter()
        .filter(|(key, value)| match value {
            Some(value) => current.get(key) != Some(value),
            None => current.contains_key(key),
        })
        .collect()
}

/// Apply a change set in place. Absent values remove their key.
pub fn apply_diff<K, V>(state: &mut HashMap<K, V>, diff: &Changes<K, V>)
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    for (key, value) in diff {
        match value {
            Some(value) => {
                state.insert(key.clone(), value.clone());
            }
            None => {
                state.remove(key);
            }
        }
    }
}
