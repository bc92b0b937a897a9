//! Synchronization primitives shared by the `rk` crates.
//!
//! [`atomic`] is always available. The lock types are the standard
//! library's and need the `std` feature.

// -----------------------------------------------------------------------------
// Modules

pub mod atomic;

// -----------------------------------------------------------------------------
// Exports

pub use alloc::sync::Arc;

#[cfg(feature = "std")]
pub use std::sync::{Mutex, MutexGuard, PoisonError};
