use core::cell::UnsafeCell;
use core::fmt;
use core::ptr::NonNull;

use rk_os::sync::atomic::{AtomicUsize, Ordering, fence};

/// Counts above this value are treated as a leak of `RefPtr`s.
const MAX_REFCOUNT: usize = isize::MAX as usize;

// -----------------------------------------------------------------------------
// Ownership

/// How to free the allocation that embeds a heap owned [`RefCount`].
#[derive(Clone, Copy)]
pub(crate) struct Release {
    /// Byte distance from the start of the allocation to the `RefCount`.
    pub offset: usize,
    /// Drops the value and frees the allocation starting at the given address.
    pub drop_fn: unsafe fn(NonNull<u8>),
}

#[derive(Clone, Copy)]
enum Ownership {
    NonOwning,
    HeapOwned(Release),
}

// -----------------------------------------------------------------------------
// RefCount

/// The control block embedded in every value managed by a [`RefPtr`].
///
/// Holds the shared count and whether reaching zero should free the value.
/// A new `RefCount` is *non-owning* with a count of zero; only
/// [`RefPtr::new`] and friends switch it to *heap owned*.
///
/// Cloning a `RefCount` yields a fresh, unshared control block, so managed
/// types may derive `Clone`.
///
/// [`RefPtr`]: crate::RefPtr
/// [`RefPtr::new`]: crate::RefPtr::new
///
/// # Examples
///
/// ```
/// use rk_ptr::{RefCount, RefPtr, impl_ref_counted};
///
/// struct Node {
///     rc: RefCount,
///     value: u32,
/// }
///
/// impl_ref_counted!(Node, rc);
///
/// let node = RefPtr::new(Node { rc: RefCount::new(), value: 3 });
/// assert_eq!(node.rc.count(), 1);
/// assert!(node.rc.is_heap_owned());
/// ```
pub struct RefCount {
    count: AtomicUsize,
    ownership: UnsafeCell<Ownership>,
}

// SAFETY: `count` is atomic. `ownership` is only written by `init_heap_owned`,
// whose caller guarantees no other reference to the block exists yet.
unsafe impl Send for RefCount {}
// SAFETY: See above.
unsafe impl Sync for RefCount {}

impl RefCount {
    /// Creates a non-owning control block with a count of zero.
    #[inline]
    pub const fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            ownership: UnsafeCell::new(Ownership::NonOwning),
        }
    }

    /// Returns the current number of shares.
    ///
    /// The value may be stale by the time it is observed if other threads
    /// hold pointers to the same object.
    #[inline]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Returns `true` if the value was allocated by a `RefPtr` factory.
    #[inline]
    pub fn is_heap_owned(&self) -> bool {
        matches!(self.ownership(), Ownership::HeapOwned(_))
    }

    #[inline(always)]
    fn ownership(&self) -> Ownership {
        // SAFETY: Written only before the block is shared.
        unsafe { *self.ownership.get() }
    }

    /// Switches to heap owned with a single share.
    ///
    /// # Safety
    /// The caller holds the only reference to the value embedding this block,
    /// and `release` frees exactly that value.
    pub(crate) unsafe fn init_heap_owned(&self, release: Release) {
        debug_assert_eq!(
            self.count.load(Ordering::Relaxed),
            0,
            "a shared value was moved into a new allocation"
        );
        self.count.store(1, Ordering::Relaxed);
        // SAFETY: No other reference exists, guaranteed by the caller.
        unsafe {
            *self.ownership.get() = Ownership::HeapOwned(release);
        }
    }

    /// Adds one share.
    #[inline]
    pub(crate) fn increment(&self) {
        // A new share is always derived from an existing one, which already
        // synchronizes with the value, so `Relaxed` is enough here.
        let old = self.count.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            refcount_overflow();
        }
    }

    /// Drops one share and reports whether the caller must free the value.
    ///
    /// Only a heap owned block whose count just reached zero returns `true`.
    #[inline]
    pub(crate) fn decrement_and_should_deallocate(&self) -> bool {
        let old = self.count.fetch_sub(1, Ordering::Release);
        debug_assert_ne!(old, 0, "reference count underflow");

        if old != 1 {
            return false;
        }

        match self.ownership() {
            Ownership::NonOwning => false,
            Ownership::HeapOwned(_) => {
                // Pairs with the `Release` decrements of every other share.
                fence(Ordering::Acquire);
                true
            }
        }
    }

    /// Drops and frees the value embedding the block at `this`.
    ///
    /// # Safety
    /// `decrement_and_should_deallocate` on this block returned `true`, and
    /// nothing touches the block or its value afterwards.
    pub(crate) unsafe fn deallocate(this: NonNull<RefCount>) {
        // SAFETY: The block is still alive, copy the release info out first.
        let ownership = unsafe { *(*this.as_ptr()).ownership.get() };
        match ownership {
            Ownership::HeapOwned(Release { offset, drop_fn }) => {
                // SAFETY: `offset` was measured from the start of the same allocation.
                let base = unsafe { this.cast::<u8>().sub(offset) };
                // SAFETY: Guaranteed by the caller.
                unsafe { drop_fn(base) }
            }
            Ownership::NonOwning => unreachable!("non-owning values are never deallocated"),
        }
    }
}

impl Default for RefCount {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for RefCount {
    /// Returns a fresh block, shares are never cloned.
    #[inline]
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Drop for RefCount {
    fn drop(&mut self) {
        #[cfg(any(feature = "debug", debug_assertions))]
        {
            let count = *self.count.get_mut();
            if count != 0 {
                log::error!(
                    "value dropped while {count} RefPtr(s) still point to it; \
                     borrowed storage must outlive every pointer"
                );
            }
        }
    }
}

impl fmt::Debug for RefCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCount")
            .field("count", &self.count())
            .field("heap_owned", &self.is_heap_owned())
            .finish()
    }
}

#[cold]
#[inline(never)]
fn refcount_overflow() -> ! {
    log::error!("RefPtr reference count overflow");

    #[cfg(feature = "std")]
    std::process::abort();

    #[cfg(not(feature = "std"))]
    panic!("RefPtr reference count overflow");
}

// -----------------------------------------------------------------------------
// RefCounted

/// A type that embeds a [`RefCount`] and can be managed by [`RefPtr`].
///
/// Usually implemented through [`impl_ref_counted!`](crate::impl_ref_counted).
///
/// # Safety
///
/// `ref_count` must always return the same block, and that block must be
/// stored inside `self` (directly or in a nested field). Trait objects whose
/// trait has `RefCounted` as a supertrait inherit this guarantee.
///
/// [`RefPtr`]: crate::RefPtr
pub unsafe trait RefCounted {
    /// Returns the embedded control block.
    fn ref_count(&self) -> &RefCount;
}

/// Implements [`RefCounted`] by naming the field that holds the [`RefCount`].
///
/// Nested fields are written as a path, e.g. `impl_ref_counted!(Outer, base.rc)`.
#[macro_export]
macro_rules! impl_ref_counted {
    ($ty:ty, $($field:tt).+) => {
        // SAFETY: The block is a field of `Self`.
        unsafe impl $crate::RefCounted for $ty {
            #[inline(always)]
            fn ref_count(&self) -> &$crate::RefCount {
                &self.$($field).+
            }
        }
    };
}

// -----------------------------------------------------------------------------
// Tests
