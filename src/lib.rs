//! # Observable Map
//!
//! A key-value map that notifies subscribers whenever entries are added,
//! changed, or removed, delivering the delta alongside before/after snapshots.
//!
//! ## Core Concepts
//!
//! - **Update events**: the changed entries plus immutable before/after snapshots
//! - **Key filters**: subscribers may restrict delivery to a set of keys
//! - **Type pins**: type-safe maps reject a value whose kind differs from the
//!   first value written to that key
//! - **Baseline**: the construction-time state, restored by `revert`
//! - **Sources**: channels whose values are piped into a single key
//!
//! ## Example
//!
//! ```ignore
//! use observable_map::{ObservableMap, SubscriptionFilter};
//! use serde_json::json;
//!
//! let map = ObservableMap::type_safe(None);
//!
//! // Only "x" updates (and resend-all signals) reach this subscriber
//! let stream = map.subscribe_stream(SubscriptionFilter::keys(["x".to_string()]))?;
//!
//! map.set("x".to_string(), json!(1))?;
//! assert!(map.set("x".to_string(), json!("a")).is_err());
//!
//! let event = stream.recv()?;
//! assert_eq!(event.before.len(), 0);
//! ```

pub mod error;
pub mod map;
pub mod sources;
pub mod state;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{MapError, Result};
pub use map::{MapConfig, ObservableMap};
pub use sources::SOURCE_THREAD_NAME;
pub use state::{apply_diff, compute_diff, Baseline, TypeRegistry};
pub use subscriptions::{
    BusConfig, Callback, EventStream, NotificationBus, SubscriptionFilter, SubscriptionId,
};
pub use types::{Changes, Typed, UpdateEvent, ValueKind};
