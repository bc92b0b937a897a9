use rk_os::sync::{Mutex, PoisonError};

use crate::RefPtr;

/// Creates, returns or drops the object in a shared slot, depending on
/// whether it is currently wanted.
///
/// - `condition` is `true`: returns a copy of the stored object, calling
///   `factory` first if the slot is empty. The factory runs at most once
///   per empty slot.
/// - `condition` is `false`: empties the slot and returns an empty pointer.
///
/// The lock is held while `factory` runs.
///
/// # Examples
///
/// ```
/// use std::sync::Mutex;
/// use rk_ptr::{RefCount, RefPtr, impl_ref_counted, lazy_initialize};
///
/// struct Cache {
///     rc: RefCount,
/// }
///
/// impl_ref_counted!(Cache, rc);
///
/// let slot = Mutex::new(RefPtr::null());
/// let cache = lazy_initialize(true, &slot, || RefPtr::new(Cache { rc: RefCount::new() }));
/// assert_eq!(cache.strong_count(), 2);
///
/// assert!(lazy_initialize(false, &slot, || unreachable!()).is_null());
/// assert_eq!(cache.strong_count(), 1);
/// ```
pub fn lazy_initialize<T, F>(condition: bool, slot: &Mutex<RefPtr<T>>, factory: F) -> RefPtr<T>
where
    T: ?Sized,
    F: FnOnce() -> RefPtr<T>,
{
    // Only whole pointers are ever stored, a poisoned slot is still consistent.
    let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);

    if !condition {
        let old = guard.take();
        // Release outside the lock, dropping the object may take a while.
        drop(guard);
        drop(old);
        return RefPtr::null();
    }

    if guard.is_null() {
        *guard = factory();
        log::trace!("lazily initialized shared slot");
    }
    guard.copy()
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::lazy_initialize;
    use crate::{RefCount, RefPtr, impl_ref_counted};

    use alloc::string::String;
    use std::sync::Mutex;

    struct Text {
        rc: RefCount,
        value: String,
    }

    impl_ref_counted!(Text, rc);

    fn text(value: &str) -> RefPtr<Text> {
        RefPtr::new(Text {
            rc: RefCount::new(),
            value: value.into(),
        })
    }

    fn unimplemented() -> RefPtr<Text> {
        panic!("factory must not be called")
    }

    #[test]
    fn returns_existing_value() {
        let slot = Mutex::new(text("hello"));
        let result = lazy_initialize(true, &slot, unimplemented);
        assert_eq!(result.value, "hello");
        assert_eq!(result.strong_count(), 2);
    }

    #[test]
    fn returns_null_when_not_wanted() {
        let slot = Mutex::new(RefPtr::null());
        let result = lazy_initialize(false, &slot, unimplemented);
        assert!(result.is_null());
        assert!(slot.lock().unwrap().is_null());
    }

    #[test]
    fn initializes_once() {
        let slot = Mutex::new(RefPtr::null());
        let first = lazy_initialize(true, &slot, || text("called"));
        assert_eq!(first.value, "called");

        let second = lazy_initialize(true, &slot, unimplemented);
        assert!(second.ptr_eq(&first));
        assert_eq!(first.strong_count(), 3);
    }

    #[test]
    fn drops_value_when_not_wanted() {
        let slot = Mutex::new(text("hello"));
        let held = slot.lock().unwrap().copy();
        assert_eq!(held.strong_count(), 2);

        let result = lazy_initialize(false, &slot, unimplemented);
        assert!(result.is_null());
        assert!(slot.lock().unwrap().is_null());
        assert_eq!(held.strong_count(), 1);
    }
}
