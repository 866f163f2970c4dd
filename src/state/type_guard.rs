//! Per-key type pinning.

use crate::error::{MapError, Result};
use crate::types::{Changes, Typed, ValueKind};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Registry of pinned kinds, one per key.
///
/// Pins are added on the first non-null write to a key and are never removed,
/// even when the key is later deleted.
#[derive(Clone, Debug)]
pub struct TypeRegistry<K> {
    pins: HashMap<K, ValueKind>,
}

impl<K> Default for TypeRegistry<K> {
    fn default() -> Self {
        Self {
            pins: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone + Debug> TypeRegistry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded from existing entries.
    pub fn seeded<'a, V, I>(entries: I) -> Self
    where
        V: Typed + 'a,
        K: 'a,
        I: IntoIterator<Item = (&'a K, &'a V)>,
    {
        let mut registry = Self::new();
        for (key, value) in entries {
            let kind = value.kind();
            if !kind.is_null() {
                registry.pins.entry(key.clone()).or_insert(kind);
            }
        }
        registry
    }

    /// Pinned kind for a key.
    pub fn get(&self, key: &K) -> Option<ValueKind> {
        self.pins.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Validate every present value in `changes`.
    ///
    /// Returns the pins the change set would add. Nothing is recorded until
    /// `commit` is called, so a rejected write leaves the registry untouched.
    pub fn check<V: Typed>(&self, changes: &Changes<K, V>) -> Result<Vec<(K, ValueKind)>> {
        let mut new_pins = Vec::new();
        for (key, value) in changes {
            let Some(value) = value else { continue };
            let actual = value.kind();
            if actual.is_null() {
                continue;
            }
            match self.pins.get(key) {
                Some(&expected) if expected != actual => {
                    return Err(MapError::type_conflict(key, expected, actual));
                }
                Some(_) => {}
                None => new_pins.push((key.clone(), actual)),
            }
        }
        Ok(new_pins)
    }

    /// Record pins returned by `check`.
    pub fn commit(&mut self, new_pins: Vec<(K, ValueKind)>) {
        for (key, kind) in new_pins {
            self.pins.entry(key).or_insert(kind);
        }
    }

    /// Explicitly pin a key.
    pub fn pin(&mut self, key: K, kind: ValueKind) -> Result<()> {
        if kind.is_null() {
            return Err(MapError::UnsupportedOperation(
                "null cannot be pinned as a key type".to_string(),
            ));
        }
        match self.pins.get(&key) {
            Some(&expected) if expected != kind => {
                Err(MapError::type_conflict(&key, expected, kind))
            }
            Some(_) => Ok(()),
            None => {
                self.pins.insert(key, kind);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn changes(entries: Vec<(&'static str, Option<Value>)>) -> Changes<&'static str, Value> {
        entries.into_iter().collect()
    }

    #[test]
    fn test_first_write_pins() {
        let mut registry = TypeRegistry::new();
        let pins = registry.check(&changes(vec![("x", Some(json!(1)))])).unwrap();
        registry.commit(pins);

        assert_eq!(registry.get(&"x"), Some(ValueKind::Integer));
    }

    #[test]
    fn test_conflict_rejected_without_recording() {
        let mut registry = TypeRegistry::new();
        registry.pin("x", ValueKind::Integer).unwrap();

        let result = registry.check(&changes(vec![
            ("y", Some(json!(true))),
            ("x", Some(json!("a"))),
        ]));
        match result {
            Err(MapError::TypeConflict {
                key,
                expected,
                actual,
            }) => {
                assert_eq!(key, "\"x\"");
                assert_eq!(expected, ValueKind::Integer);
                assert_eq!(actual, ValueKind::String);
            }
            other => panic!("Expected TypeConflict, got {:?}", other),
        }
        assert_eq!(registry.get(&"y"), None);
    }

    #[test]
    fn test_absent_and_null_are_exempt() {
        let mut registry = TypeRegistry::new();
        registry.pin("x", ValueKind::Integer).unwrap();

        let pins = registry
            .check(&changes(vec![("x", None), ("z", Some(Value::Null))]))
            .unwrap();
        assert!(pins.is_empty());

        registry.commit(pins);
        assert_eq!(registry.get(&"x"), Some(ValueKind::Integer));
        assert_eq!(registry.get(&"z"), None);
    }

    #[test]
    fn test_seeded_from_entries() {
        let initial: HashMap<&'static str, Value> =
            [("a", json!(1)), ("b", json!("s")), ("c", Value::Null)]
                .into_iter()
                .collect();
        let registry = TypeRegistry::seeded(initial.iter());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(&"b"), Some(ValueKind::String));
    }

    #[test]
    fn test_explicit_pin() {
        let mut registry: TypeRegistry<&'static str> = TypeRegistry::new();
        registry.pin("a", ValueKind::Float).unwrap();
        registry.pin("a", ValueKind::Float).unwrap();

        assert!(matches!(
            registry.pin("a", ValueKind::Integer),
            Err(MapError::TypeConflict { .. })
        ));
        assert!(matches!(
            registry.pin("b", ValueKind::Null),
            Err(MapError::UnsupportedOperation(_))
        ));
    }
}
