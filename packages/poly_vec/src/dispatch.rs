use std::alloc::Layout;
use std::fmt;
use std::ptr::{self, NonNull};

use crate::Occupant;

/// Remembers how to view a slot's bytes as the capability set `B` while forgetting the
/// concrete type stored there.
///
/// A container keeps one `Dispatch` alongside each live slot. Its presence is what marks
/// the slot as live; a freed slot has none.
///
/// Obtain one with [`Dispatch::of()`]. A `Dispatch` is mostly needed for
/// [`PolyVec::memplace()`][crate::PolyVec::memplace] and
/// [`PolyVec::memplace_back()`][crate::PolyVec::memplace_back], where the concrete type is
/// no longer statically known at the call site.
pub struct Dispatch<B: ?Sized> {
    layout: Layout,
    upcast_fn: fn(NonNull<u8>) -> NonNull<B>,
}

impl<B: ?Sized> Dispatch<B> {
    /// Creates the dispatch handle for occupants of type `T`.
    ///
    /// # Example
    ///
    /// ```
    /// use std::alloc::Layout;
    ///
    /// use poly_vec::Dispatch;
    ///
    /// let dispatch = Dispatch::<u64>::of::<u64>();
    /// assert_eq!(dispatch.layout(), Layout::new::<u64>());
    /// ```
    #[must_use]
    #[inline]
    pub fn of<T: Occupant<B>>() -> Self {
        Self {
            layout: Layout::new::<T>(),
            upcast_fn: upcast_fn::<T, B>,
        }
    }

    /// The memory layout of the concrete type this handle was created for.
    #[must_use]
    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Views the object at `ptr` as the capability set.
    #[must_use]
    #[inline]
    pub(crate) fn upcast(&self, ptr: NonNull<u8>) -> NonNull<B> {
        (self.upcast_fn)(ptr)
    }

    /// Drops the object at `ptr` in place.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// 1. `ptr` points to a live object of the type this handle was created for.
    /// 2. The object is not used or dropped again afterwards.
    #[inline]
    pub(crate) unsafe fn drop_in_place(&self, ptr: NonNull<u8>) {
        let object = self.upcast(ptr);

        // SAFETY: Forwarding the guarantees from the caller. Dropping through the capability
        // set runs the concrete type's destructor.
        unsafe {
            ptr::drop_in_place(object.as_ptr());
        }
    }
}

fn upcast_fn<T: Occupant<B>, B: ?Sized>(ptr: NonNull<u8>) -> NonNull<B> {
    T::upcast(ptr.cast::<T>())
}

impl<B: ?Sized> Clone for Dispatch<B> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: ?Sized> Copy for Dispatch<B> {}

impl<B: ?Sized> fmt::Debug for Dispatch<B> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}
