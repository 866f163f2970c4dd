//! Map state primitives: change computation, type pinning and the baseline.
//!
//! These are pure building blocks. `ObservableMap` combines them under its
//! write lock so every mutation is a single state transition.

mod baseline;
mod diff;
mod type_guard;

pub use baseline::Baseline;
pub use diff::{apply_diff, compute_diff};
pub use type_guard::TypeRegistry;
