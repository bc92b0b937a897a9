//! Atomic integers used by reference counts and stats.
//!
//! Pointer-sized atomics must be native: a `RefCount` is a single
//! `AtomicUsize`, so targets without them are rejected at compile time.
//! 64-bit atomics fall back to `portable_atomic` where the target has none.
//!
//! [`core::sync::atomic`] documents the types and orderings.

pub use core::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize};
pub use core::sync::atomic::{Ordering, fence};

#[cfg(target_has_atomic = "64")]
pub use core::sync::atomic::{AtomicI64, AtomicU64};

#[cfg(not(target_has_atomic = "64"))]
pub use portable_atomic::{AtomicI64, AtomicU64};

#[cfg(not(target_has_atomic = "ptr"))]
compile_error!("reference counting requires native pointer-sized atomics.");

#[cfg(test)]
mod tests {
    use super::{AtomicU64, AtomicUsize, Ordering};

    #[test]
    fn min_max_on_u64() {
        let value = AtomicU64::new(u64::MAX);
        value.fetch_min(12, Ordering::Relaxed);
        value.fetch_min(40, Ordering::Relaxed);
        assert_eq!(value.load(Ordering::Relaxed), 12);

        value.fetch_max(99, Ordering::Relaxed);
        assert_eq!(value.load(Ordering::Relaxed), 99);
    }

    #[test]
    fn usize_wraps_like_core() {
        let value = AtomicUsize::new(usize::MAX);
        assert_eq!(value.fetch_add(1, Ordering::Relaxed), usize::MAX);
        assert_eq!(value.load(Ordering::Relaxed), 0);
    }
}
