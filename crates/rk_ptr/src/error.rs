use core::alloc::Layout;

use thiserror::Error;

/// The allocator could not provide storage for a new [`RefPtr`](crate::RefPtr).
///
/// Returned by [`RefPtr::try_new`](crate::RefPtr::try_new). Treat it as fatal:
/// propagate it instead of retrying.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("memory allocation of {} bytes failed", .layout.size())]
pub struct AllocError {
    layout: Layout,
}

impl AllocError {
    #[cold]
    pub(crate) const fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// The layout that could not be allocated.
    #[inline]
    pub const fn layout(&self) -> Layout {
        self.layout
    }
}
