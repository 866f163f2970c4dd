//! Core types for the observable map.

use crate::error::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// A partial update: key mapped to a new value, or `None` for removal.
pub type Changes<K, V> = HashMap<K, Option<V>>;

/// Runtime kind of a value, used to pin a key's type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Null,
    Boolean,
    Integer,
    Float,
    String,
    Array,
    Object,
    /// A user-defined kind.
    Custom(&'static str),
}

impl ValueKind {
    /// Null never pins a key and is never checked against a pin.
    pub fn is_null(&self) -> bool {
        matches!(self, ValueKind::Null)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Boolean => "boolean",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Custom(name) => *name,
        };
        f.write_str(name)
    }
}

/// Values that can report their kind.
///
/// Type-safe maps pin the kind of the first non-null value written to a key
/// and reject later values of a different kind.
pub trait Typed {
    fn kind(&self) -> ValueKind;
}

impl Typed for serde_json::Value {
    fn kind(&self) -> ValueKind {
        match self {
            serde_json::Value::Null => ValueKind::Null,
            serde_json::Value::Bool(_) => ValueKind::Boolean,
            serde_json::Value::Number(n) if n.is_f64() => ValueKind::Float,
            serde_json::Value::Number(_) => ValueKind::Integer,
            serde_json::Value::String(_) => ValueKind::String,
            serde_json::Value::Array(_) => ValueKind::Array,
            serde_json::Value::Object(_) => ValueKind::Object,
        }
    }
}

macro_rules! impl_typed {
    ($kind:expr => $($ty:ty),+) => {
        $(
            impl Typed for $ty {
                fn kind(&self) -> ValueKind {
                    $kind
                }
            }
        )+
    };
}

impl_typed!(ValueKind::Integer => i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);
impl_typed!(ValueKind::Float => f32, f64);
impl_typed!(ValueKind::Boolean => bool);
impl_typed!(ValueKind::String => String, &'static str);

impl<T> Typed for Vec<T> {
    fn kind(&self) -> ValueKind {
        ValueKind::Array
    }
}

/// A change notification.
///
/// `changed` holds only the keys whose value differs from `before`, except for
/// the synthetic events produced by resends. An empty `changed` set is the
/// resend-all signal that every subscriber receives regardless of its filter.
///
/// Snapshots are shared immutable copies: the map never mutates a snapshot it
/// has published.
#[derive(Debug, Serialize)]
pub struct UpdateEvent<K, V> {
    pub changed: Arc<Changes<K, V>>,
    pub after: Arc<HashMap<K, V>>,
    pub before: Arc<HashMap<K, V>>,
}

// Manual Clone: only bumps reference counts.
impl<K, V> Clone for UpdateEvent<K, V> {
    fn clone(&self) -> Self {
        Self {
            changed: Arc::clone(&self.changed),
            after: Arc::clone(&self.after),
            before: Arc::clone(&self.before),
        }
    }
}

impl<K: Eq + Hash, V> UpdateEvent<K, V> {
    pub fn new(
        changed: Changes<K, V>,
        after: Arc<HashMap<K, V>>,
        before: Arc<HashMap<K, V>>,
    ) -> Self {
        Self {
            changed: Arc::new(changed),
            after,
            before,
        }
    }

    /// A resend-all event: nothing changed, `after` and `before` are `state`.
    pub fn resend_all(state: Arc<HashMap<K, V>>) -> Self {
        Self {
            changed: Arc::new(HashMap::new()),
            after: Arc::clone(&state),
            before: state,
        }
    }

    /// True for the resend-all signal.
    pub fn is_resend_all(&self) -> bool {
        self.changed.is_empty()
    }

    /// Whether `key` is part of the change set.
    pub fn touches(&self, key: &K) -> bool {
        self.changed.contains_key(key)
    }

    /// Changed keys.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.changed.keys()
    }

    pub fn value_after(&self, key: &K) -> Option<&V> {
        self.after.get(key)
    }

    pub fn value_before(&self, key: &K) -> Option<&V> {
        self.before.get(key)
    }
}

impl<K: Serialize, V: Serialize> UpdateEvent<K, V> {
    /// Encode as `{"changed": .., "after": .., "before": ..}`.
    ///
    /// Fails when keys do not serialize as strings.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
