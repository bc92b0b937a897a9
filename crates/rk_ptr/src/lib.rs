//! Intrusive reference counting for shared, polymorphic objects.
//!
//! **RefCount** and **RefCounted**
//!
//! A managed type embeds a [`RefCount`] field and names it through the
//! [`RefCounted`] trait (usually with [`impl_ref_counted!`]). The block holds the
//! shared count and whether the value lives in a `RefPtr` allocation.
//!
//! **RefPtr**
//!
//! [`RefPtr<T>`] is a move-only owning pointer holding one share. It is created
//! by [`RefPtr::new`] (heap owned, freed with the last share) or
//! [`RefPtr::singleton`] (static storage, never freed). Shares are duplicated
//! only by the explicit [`RefPtr::copy`].
//!
//! **Upcast** and **RefView**
//!
//! [`Upcast`] describes how a derived type is seen as a less derived one: a
//! trait object, or a base stored in a field at some offset. [`RefPtr::upcast`]
//! moves a share into the base type, [`RefPtr::borrow_as`] returns a
//! [`RefView`] holding no share, whose [`copy`](RefView::copy) yields an
//! independent `RefPtr`.
//!
//! **Shared slots**
//!
//! With `std`, [`lazy_initialize`] creates or drops the object held in a
//! `Mutex<RefPtr<T>>` on demand.
//!
//! There is no cycle collection, ownership graphs must stay acyclic.
#![expect(unsafe_code, reason = "Raw pointers are inherently unsafe.")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![no_std]

// -----------------------------------------------------------------------------
// no_std support

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

// -----------------------------------------------------------------------------
// Modules

mod error;
#[cfg(feature = "std")]
mod lazy;
mod ref_count;
mod ref_ptr;
mod upcast;

// -----------------------------------------------------------------------------
// Top-level exports

pub use error::AllocError;
#[cfg(feature = "std")]
pub use lazy::lazy_initialize;
pub use ref_count::{RefCount, RefCounted};
pub use ref_ptr::{RefPtr, RefView, make_ref_ptr};
pub use upcast::Upcast;
