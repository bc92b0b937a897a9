use alloc::boxed::Box;
use core::alloc::Layout;
use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;
use core::ptr::{self, NonNull};

use crate::error::AllocError;
use crate::ref_count::{RefCount, RefCounted, Release};
use crate::upcast::Upcast;

// -----------------------------------------------------------------------------
// Inner

/// The populated state of a pointer: access address and control block.
struct Inner<T: ?Sized> {
    access: NonNull<T>,
    control: NonNull<RefCount>,
}

impl<T: ?Sized> Clone for Inner<T> {
    #[inline(always)]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Inner<T> {}

impl<T: ?Sized> Inner<T> {
    /// # Safety
    /// A share on the block must be held for the returned lifetime.
    #[inline(always)]
    unsafe fn control<'a>(self) -> &'a RefCount {
        // SAFETY: Guaranteed by the caller.
        unsafe { self.control.as_ref() }
    }

    #[inline(always)]
    fn project<U: ?Sized>(self) -> Inner<U>
    where
        T: Upcast<U>,
    {
        Inner {
            access: T::upcast_ptr(self.access),
            control: self.control,
        }
    }
}

// -----------------------------------------------------------------------------
// Common methods

macro_rules! impl_shared {
    ($ptr:ident $(<$lt:lifetime>)?) => {
        impl<$($lt,)? T: ?Sized> $ptr<$($lt,)? T> {
            /// Returns `true` if the pointer does not refer to an object.
            #[inline(always)]
            pub const fn is_null(&self) -> bool {
                self.inner.is_none()
            }

            /// Returns the address of the object as seen through `T`, or null.
            ///
            /// Views of the same object through different types compare equal
            /// only when the types share an address (e.g. a trait object),
            /// a base stored in a field reports the field's address.
            #[inline]
            pub fn get(&self) -> *const u8 {
                match self.inner {
                    Some(inner) => inner.access.as_ptr().cast::<u8>().cast_const(),
                    None => ptr::null(),
                }
            }

            /// Returns `true` if both pointers report the same [`get`](Self::get)
            /// address, two empty pointers included.
            ///
            /// Only the address is compared: a base stored at an offset is not
            /// equal to its derived object.
            #[inline]
            pub fn ptr_eq<U: ?Sized>(&self, other: &RefPtr<U>) -> bool {
                self.get() == other.get()
            }

            /// Returns a reference to the object, or `None` if empty.
            #[inline]
            pub fn as_deref(&self) -> Option<&T> {
                // SAFETY: A populated pointer keeps its object alive.
                self.inner.map(|inner| unsafe { inner.access.as_ref() })
            }

            /// Returns the number of shares on the object, `0` if empty.
            #[inline]
            pub fn strong_count(&self) -> usize {
                match self.inner {
                    // SAFETY: A populated pointer keeps its block alive.
                    Some(inner) => unsafe { inner.control() }.count(),
                    None => 0,
                }
            }

            /// Returns a new pointer holding its own share, or an empty one.
            ///
            /// This is the only way to duplicate a share, there is no `Clone`.
            #[inline]
            #[must_use]
            pub fn copy(&self) -> RefPtr<T> {
                match self.inner {
                    Some(inner) => {
                        // SAFETY: A populated pointer keeps its block alive.
                        unsafe { inner.control() }.increment();
                        RefPtr::from_inner(inner)
                    }
                    None => RefPtr::null(),
                }
            }

            /// Borrows a view of the object as a less derived type `U`.
            ///
            /// The view holds no share and cannot outlive `self`; call
            /// [`RefView::copy`] to obtain an independent `RefPtr<U>`.
            #[inline]
            pub fn borrow_as<U: ?Sized>(&self) -> RefView<'_, U>
            where
                T: Upcast<U>,
            {
                RefView {
                    inner: self.inner.map(Inner::project),
                    _marker: PhantomData,
                }
            }
        }

        impl<$($lt,)? T: ?Sized> Deref for $ptr<$($lt,)? T> {
            type Target = T;

            /// Panics if the pointer is empty.
            #[inline]
            #[track_caller]
            fn deref(&self) -> &T {
                match self.as_deref() {
                    Some(value) => value,
                    None => null_deref(stringify!($ptr)),
                }
            }
        }

        impl<$($lt,)? T: ?Sized> fmt::Pointer for $ptr<$($lt,)? T> {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Pointer::fmt(&self.get(), f)
            }
        }

        impl<$($lt,)? T: ?Sized> fmt::Debug for $ptr<$($lt,)? T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:p}, count: {})", stringify!($ptr), self.get(), self.strong_count())
            }
        }

        // SAFETY: Same rules as `Arc<T>`, shares may be dropped on any thread.
        unsafe impl<$($lt,)? T: ?Sized + Send + Sync> Send for $ptr<$($lt,)? T> {}
        // SAFETY: As above.
        unsafe impl<$($lt,)? T: ?Sized + Send + Sync> Sync for $ptr<$($lt,)? T> {}
    };
}

#[cold]
#[inline(never)]
#[track_caller]
fn null_deref(name: &str) -> ! {
    panic!("dereferenced an empty {name}")
}

// -----------------------------------------------------------------------------
// RefPtr

/// An owning pointer to a value with an embedded [`RefCount`].
///
/// A populated `RefPtr` holds exactly one share of its object. Shares are
/// only duplicated by the explicit [`copy`](Self::copy), moves transfer the
/// share, and dropping or [`reset`](Self::reset)ting releases it. The object
/// is freed when the last share of a heap owned object is released; objects
/// wrapped by [`singleton`](Self::singleton) are never freed.
///
/// # Examples
///
/// ```
/// use rk_ptr::{RefCount, RefPtr, impl_ref_counted};
///
/// struct MyThing {
///     rc: RefCount,
///     name: String,
/// }
///
/// impl_ref_counted!(MyThing, rc);
///
/// let owner1 = RefPtr::new(MyThing { rc: RefCount::new(), name: "hello".into() });
/// let owner2 = owner1.copy();
/// assert_eq!(owner2.strong_count(), 2);
///
/// drop(owner1);
/// assert_eq!(owner2.name, "hello");
/// assert_eq!(owner2.strong_count(), 1);
/// ```
pub struct RefPtr<T: ?Sized> {
    inner: Option<Inner<T>>,
    _marker: PhantomData<T>,
}

impl_shared!(RefPtr);

impl<T: ?Sized> RefPtr<T> {
    /// Creates an empty pointer.
    #[inline(always)]
    pub const fn null() -> Self {
        Self {
            inner: None,
            _marker: PhantomData,
        }
    }

    #[inline(always)]
    const fn from_inner(inner: Inner<T>) -> Self {
        Self {
            inner: Some(inner),
            _marker: PhantomData,
        }
    }

    /// Moves the share out, leaving `self` empty.
    #[inline]
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            inner: self.inner.take(),
            _marker: PhantomData,
        }
    }

    /// Releases the share, freeing the object if it was the last one.
    ///
    /// The pointer is empty afterwards.
    pub fn reset(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };

        // SAFETY: `inner` carried a share until this call.
        if unsafe { inner.control() }.decrement_and_should_deallocate() {
            // SAFETY: That was the last share and nothing refers to the object.
            unsafe { RefCount::deallocate(inner.control) }
        }
    }

    /// Converts into a pointer to a less derived type, keeping the share.
    ///
    /// The count does not change. [`get`](Self::get) on the result reports the
    /// address of the `U` view.
    #[inline]
    pub fn upcast<U: ?Sized>(mut self) -> RefPtr<U>
    where
        T: Upcast<U>,
    {
        RefPtr {
            inner: self.inner.take().map(Inner::project),
            _marker: PhantomData,
        }
    }
}

impl<T: RefCounted> RefPtr<T> {
    /// Moves `value` to the heap and returns the first share of it.
    ///
    /// Allocation failure is fatal, see [`try_new`](Self::try_new) to observe it.
    #[inline]
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }

    /// Like [`new`](Self::new), but reports allocation failure.
    pub fn try_new(value: T) -> Result<Self, AllocError> {
        // `RefCount` is not zero-sized, so neither is `T`.
        let layout = Layout::new::<T>();

        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc::alloc::alloc(layout) }.cast::<T>();
        let Some(raw) = NonNull::new(raw) else {
            return Err(AllocError::new(layout));
        };

        // SAFETY: Fresh, suitably aligned allocation for one `T`.
        unsafe { raw.as_ptr().write(value) };

        // SAFETY: Allocated by the global allocator with `T`'s layout and initialized.
        Ok(Self::from_box(unsafe { Box::from_raw(raw.as_ptr()) }))
    }

    /// Takes over a boxed value and returns the first share of it.
    pub fn from_box(value: Box<T>) -> Self {
        let access = NonNull::from(Box::leak(value));

        // SAFETY: Just leaked, valid and unaliased.
        let block: *const RefCount = unsafe { access.as_ref() }.ref_count();
        let offset = block.addr().wrapping_sub(access.as_ptr().addr());
        debug_assert!(
            offset
                .checked_add(size_of::<RefCount>())
                .is_some_and(|end| end <= size_of::<T>()),
            "`RefCounted::ref_count` returned a block outside the value"
        );

        // Derived from `access` so it may later free the whole allocation.
        // SAFETY: `offset` stays inside the allocation.
        let control = unsafe { access.cast::<u8>().add(offset) }.cast::<RefCount>();

        // SAFETY: We hold the only reference, and `drop_boxed::<T>` frees this box.
        unsafe {
            control.as_ref().init_heap_owned(Release {
                offset,
                drop_fn: drop_boxed::<T>,
            });
        }

        Self::from_inner(Inner { access, control })
    }
}

/// # Safety
/// `ptr` came from `Box::<T>::leak` and is released exactly once.
unsafe fn drop_boxed<T>(ptr: NonNull<u8>) {
    // SAFETY: Guaranteed by the caller.
    drop(unsafe { Box::from_raw(ptr.cast::<T>().as_ptr()) });
}

impl<T: ?Sized + RefCounted> RefPtr<T> {
    /// Wraps a value with static storage. It is never freed.
    ///
    /// # Examples
    ///
    /// ```
    /// use rk_ptr::{RefCount, RefPtr, impl_ref_counted};
    ///
    /// struct Config {
    ///     rc: RefCount,
    ///     verbose: bool,
    /// }
    ///
    /// impl_ref_counted!(Config, rc);
    ///
    /// static DEFAULT: Config = Config { rc: RefCount::new(), verbose: false };
    ///
    /// let config = RefPtr::singleton(&DEFAULT);
    /// assert!(!config.verbose);
    /// ```
    #[inline]
    pub fn singleton(value: &'static T) -> Self {
        // SAFETY: Static storage outlives every pointer.
        unsafe { Self::from_borrowed(value) }
    }

    /// Wraps a value owned by the caller. It is never freed by a `RefPtr`.
    ///
    /// Each call takes one bookkeeping share, released like any other.
    ///
    /// # Safety
    ///
    /// `value` must outlive every pointer derived from the result, including
    /// copies and views. `value` must not be heap owned by a `RefPtr`.
    pub unsafe fn from_borrowed(value: &T) -> Self {
        let control = value.ref_count();
        debug_assert!(
            !control.is_heap_owned(),
            "`from_borrowed` on a value owned by a RefPtr"
        );

        control.increment();

        Self::from_inner(Inner {
            access: NonNull::from(value),
            control: NonNull::from(control),
        })
    }
}

impl<T: ?Sized> Drop for RefPtr<T> {
    #[inline]
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Default for RefPtr<T> {
    /// Returns an empty pointer.
    #[inline(always)]
    fn default() -> Self {
        Self::null()
    }
}

impl<T: RefCounted> From<Box<T>> for RefPtr<T> {
    #[inline]
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

/// Allocates `value` and returns the first share of it.
///
/// Shorthand for [`RefPtr::new`].
#[inline]
pub fn make_ref_ptr<T: RefCounted>(value: T) -> RefPtr<T> {
    RefPtr::new(value)
}

// -----------------------------------------------------------------------------
// RefView

/// A borrowed view of a [`RefPtr`]'s object through another type.
///
/// Created by [`RefPtr::borrow_as`]. The view holds no share; the borrow ties
/// it to the source pointer, which keeps the object alive.
pub struct RefView<'a, T: ?Sized> {
    inner: Option<Inner<T>>,
    _marker: PhantomData<&'a T>,
}

impl_shared!(RefView<'a>);

impl<T: ?Sized> Clone for RefView<'_, T> {
    #[inline(always)]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for RefView<'_, T> {}

// -----------------------------------------------------------------------------
// Tests
