//! Subscription system for live map updates.
//!
//! This module provides in-process fan-out of update events:
//! - Callback subscribers, invoked synchronously in publish order
//! - Stream subscribers, fed through crossbeam channels
//!
//! Subscriptions support:
//! - Filtering by key (resend-all events bypass the filter)
//! - Panic isolation between callbacks
//! - Bounded buffers with slow-subscriber dropping (opt-in)
//!
//! # Example
//!
//! ```ignore
//! let bus = NotificationBus::default();
//!
//! let stream = bus.subscribe_stream(SubscriptionFilter::keys(["counter"]))?;
//!
//! for event in stream.iter() {
//!     println!("changed: {:?}", event.changed);
//! }
//! ```

mod manager;
mod types;

pub use manager::{Callback, NotificationBus};
pub use types::{BusConfig, EventStream, SubscriptionFilter, SubscriptionId};
