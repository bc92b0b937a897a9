use core::ptr::NonNull;

/// Projects a pointer to `Self` onto a less derived view `U` of the same object.
///
/// `U` is either a trait object implemented by `Self`, or a "base" stored in a
/// field of `Self`. In the second case the returned address is the field's
/// address and may differ from the object's address.
///
/// Usually implemented through [`impl_upcast!`](crate::impl_upcast).
///
/// # Safety
///
/// - `upcast_ptr` must return a pointer into the object `this` points to, valid
///   for reads for as long as the object is.
/// - The view must not embed a different [`RefCount`](crate::RefCount) than the
///   one reported for `Self`.
pub unsafe trait Upcast<U: ?Sized> {
    /// Computes the view's address.
    fn upcast_ptr(this: NonNull<Self>) -> NonNull<U>;
}

/// Implements [`Upcast`] for a derived type.
///
/// - `impl_upcast!(Derived => dyn Base)` views `Derived` as a trait object.
/// - `impl_upcast!(Derived => Base, field)` views the `field` of `Derived`,
///   nested fields are written as a path (`base.inner`).
///
/// # Examples
///
/// ```
/// use rk_ptr::{RefCount, RefCounted, RefPtr, impl_ref_counted, impl_upcast};
///
/// trait Shape: RefCounted {
///     fn sides(&self) -> u32;
/// }
///
/// struct Square {
///     rc: RefCount,
/// }
///
/// impl_ref_counted!(Square, rc);
/// impl_upcast!(Square => dyn Shape);
///
/// impl Shape for Square {
///     fn sides(&self) -> u32 {
///         4
///     }
/// }
///
/// let square = RefPtr::new(Square { rc: RefCount::new() });
/// let shape: RefPtr<dyn Shape> = square.upcast();
/// assert_eq!(shape.sides(), 4);
/// assert_eq!(shape.strong_count(), 1);
/// ```
#[macro_export]
macro_rules! impl_upcast {
    ($from:ty => $to:ty, $($field:tt).+) => {
        // SAFETY: The projection stays inside the object.
        unsafe impl $crate::Upcast<$to> for $from {
            #[inline(always)]
            fn upcast_ptr(this: ::core::ptr::NonNull<Self>) -> ::core::ptr::NonNull<$to> {
                // SAFETY: `this` is non-null and points to a `Self`.
                unsafe { ::core::ptr::NonNull::new_unchecked(&raw mut (*this.as_ptr()).$($field).+) }
            }
        }
    };
    ($from:ty => $to:ty) => {
        // SAFETY: Unsizing keeps the data address.
        unsafe impl $crate::Upcast<$to> for $from {
            #[inline(always)]
            fn upcast_ptr(this: ::core::ptr::NonNull<Self>) -> ::core::ptr::NonNull<$to> {
                this
            }
        }
    };
}

// -----------------------------------------------------------------------------
// Tests
