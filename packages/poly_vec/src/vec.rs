use std::alloc::Layout;
use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ops::{Index, IndexMut};
use std::ptr::{self, NonNull};
use std::{fmt, thread};

use crate::buffer::Buffer;
use crate::{
    Dispatch, DropPolicy, Error, Granularity, Indices, Iter, IterMut, Occupant, Offset,
    PolyVecBuilder, Result,
};

/// A contiguous container of heterogeneous objects that share the capability set `B`.
///
/// Occupants of different concrete types are stored inline, back to back, in one growable
/// buffer - there is no per-object heap allocation. Each occupant lives in a *slot*,
/// identified by an index that stays valid for as long as the occupant lives.
///
/// Freeing a slot drops its occupant but keeps the slot's byte range reserved. A later
/// [`push()`](Self::push), [`emplace()`](Self::emplace) or [`memplace()`](Self::memplace)
/// reuses the first free slot whose start is suitably aligned and whose capacity is large
/// enough, without ever moving any other occupant within the buffer. The `*_back` variants
/// skip the free list and always append.
///
/// # Capability sets
///
/// `B` is typically a trait object type such as `dyn Shape`. A concrete type `T` can be
/// stored if it implements [`Occupant<B>`], which the [`occupant!`][crate::occupant] macro
/// provides. Any sized `T` can also be stored in a `PolyVec<T>`.
///
/// # Offsets and capacity
///
/// The slot table records one start offset per slot (plus the bump offset where the next
/// appended slot will start) using the integer type `O`. A narrow `O` saves memory but
/// limits how large the buffer can become; appends beyond that limit (or beyond the
/// limit set via [`PolyVecBuilder::max_buffer_size()`]) fail with
/// [`Error::CapacityExceeded`] instead of corrupting memory.
///
/// # Address stability
///
/// Slot indices are stable. Addresses are not: growing the buffer may move the whole
/// buffer to a new address, so raw pointers obtained from the container must not be held
/// across an insertion. References are protected from this by the borrow checker.
///
/// # Examples
///
/// ```rust
/// use poly_vec::{PolyVec, occupant};
///
/// trait Shape {
///     fn area(&self) -> f64;
/// }
///
/// struct Square(f64);
/// struct Circle(f64);
///
/// impl Shape for Square {
///     fn area(&self) -> f64 {
///         self.0 * self.0
///     }
/// }
///
/// impl Shape for Circle {
///     fn area(&self) -> f64 {
///         3.0 * self.0 * self.0
///     }
/// }
///
/// occupant!(dyn Shape: Square, Circle);
///
/// let mut shapes = PolyVec::<dyn Shape>::new();
///
/// let square = shapes.push(Square(2.0)).unwrap();
/// let circle = shapes.push(Circle(1.0)).unwrap();
///
/// assert_eq!(shapes[square].area(), 4.0);
/// assert_eq!(shapes.iter().map(Shape::area).sum::<f64>(), 7.0);
///
/// // Freeing keeps the slot reserved; a fitting insertion reuses it.
/// shapes.free(square).unwrap();
/// let reused = shapes.push(Square(3.0)).unwrap();
///
/// assert_eq!(reused, square);
/// assert_eq!(shapes.len(), 2);
/// # _ = circle;
/// ```
///
/// # Thread safety
///
/// The container is thread-mobile ([`Send`] if `B` is) but not thread-safe ([`Sync`]).
pub struct PolyVec<B: ?Sized, O: Offset = usize> {
    buffer: Buffer,

    /// Slot start offsets in addressing units. Always holds `len() + 1` entries, the last
    /// one being the bump offset where the next appended slot starts.
    offsets: Vec<O>,

    /// One entry per slot. `Some` marks a live slot and remembers how to reach the
    /// capability set of its occupant; `None` marks a free slot.
    dispatch: Vec<Option<Dispatch<B>>>,

    /// Indices of free slots, in no particular order.
    free_indices: Vec<O>,

    granularity: Granularity,

    /// Ceiling on the bump offset, in bytes. Always a multiple of the addressing unit.
    max_buffer_size: usize,

    drop_policy: DropPolicy,

    _owns: PhantomData<B>,
}

/// Where an insertion will place its occupant.
#[derive(Debug)]
enum Target<O> {
    Reuse {
        /// Position of the slot in the free list.
        position: usize,
        index: usize,
        start: usize,
    },
    Append {
        index: usize,
        start: usize,
        start_units: O,
        end_units: O,
    },
}

impl<O> Target<O> {
    fn start(&self) -> usize {
        match self {
            Self::Reuse { start, .. } | Self::Append { start, .. } => *start,
        }
    }
}

impl<B: ?Sized, O: Offset> PolyVec<B, O> {
    /// Creates an empty container with default settings.
    ///
    /// No memory is allocated until the first insertion.
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a builder for configuring and constructing a [`PolyVec`].
    #[inline]
    pub fn builder() -> PolyVecBuilder<B, O> {
        PolyVecBuilder::new()
    }

    /// Creates an empty container with room for `bytes` bytes of occupants and `slots`
    /// slots.
    #[must_use]
    #[inline]
    pub fn with_capacity(bytes: usize, slots: usize) -> Self {
        Self::builder()
            .buffer_capacity(bytes)
            .slot_capacity(slots)
            .build()
    }

    #[must_use]
    pub(crate) fn new_inner(
        granularity: Granularity,
        max_buffer_size: usize,
        drop_policy: DropPolicy,
        buffer_capacity: usize,
        slot_capacity: usize,
    ) -> Self {
        let mut buffer = Buffer::new();

        if buffer_capacity > 0 {
            buffer.ensure(buffer_capacity, granularity.unit(), 0, max_buffer_size);
        }

        let mut offsets = Vec::with_capacity(slot_capacity.saturating_add(1));
        offsets.push(O::ZERO);

        Self {
            buffer,
            offsets,
            dispatch: Vec::with_capacity(slot_capacity),
            free_indices: Vec::with_capacity(slot_capacity),
            granularity,
            max_buffer_size,
            drop_policy,
            _owns: PhantomData,
        }
    }

    /// The number of slots ever created and not reset by [`free_all()`](Self::free_all)
    /// or [`clear()`](Self::clear), live or free.
    ///
    /// Valid slot indices are `0..len()`.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        // The slot table always holds the bump entry.
        self.offsets.len().wrapping_sub(1)
    }

    /// The number of slots holding a live occupant.
    #[must_use]
    #[inline]
    pub fn live_len(&self) -> usize {
        // The free list never holds more entries than there are slots.
        self.len().wrapping_sub(self.free_indices.len())
    }

    /// The number of freed slots awaiting reuse.
    #[must_use]
    #[inline]
    pub fn free_len(&self) -> usize {
        self.free_indices.len()
    }

    /// Whether every slot that exists is free.
    ///
    /// An empty container may still hold reserved slots and buffer memory.
    ///
    /// # Example
    ///
    /// ```rust
    /// use poly_vec::PolyVec;
    ///
    /// let mut vec = PolyVec::<u32>::new();
    /// assert!(vec.is_empty());
    ///
    /// let index = vec.push(5).unwrap();
    /// assert!(!vec.is_empty());
    ///
    /// vec.free(index).unwrap();
    /// assert!(vec.is_empty());
    /// assert_eq!(vec.len(), 1);
    /// ```
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.free_indices.len() == self.len()
    }

    /// Byte offset where the next appended slot will start (before alignment).
    #[must_use]
    #[inline]
    pub fn bump_offset(&self) -> usize {
        self.start_of(self.len())
    }

    /// The number of bytes the backing buffer can hold without reallocating.
    #[must_use]
    #[inline]
    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// The number of slots the slot table can hold without reallocating.
    #[must_use]
    #[inline]
    pub fn slot_capacity(&self) -> usize {
        self.dispatch.capacity()
    }

    /// The addressing granularity of the slot table.
    #[must_use]
    #[inline]
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// The largest bump offset (in bytes) the container accepts.
    #[must_use]
    #[inline]
    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    /// The policy applied to live occupants when the container is dropped.
    #[must_use]
    #[inline]
    pub fn drop_policy(&self) -> DropPolicy {
        self.drop_policy
    }

    /// Base address of the backing buffer.
    ///
    /// # Hazard
    ///
    /// The pointer is invalidated by any insertion, by [`clear()`](Self::clear),
    /// [`reserve()`](Self::reserve) and [`shrink_to_fit()`](Self::shrink_to_fit), because
    /// these may move the buffer.
    #[must_use]
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.buffer.ptr().as_ptr()
    }

    /// Returns the occupant of slot `index`, or `None` if the slot is free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if `index >= len()`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use poly_vec::{Error, PolyVec};
    ///
    /// let mut vec = PolyVec::<String>::new();
    /// let index = vec.push("first".to_string()).unwrap();
    ///
    /// assert_eq!(vec.at(index).unwrap().unwrap(), "first");
    ///
    /// vec.free(index).unwrap();
    /// assert_eq!(vec.at(index), Ok(None));
    ///
    /// assert!(matches!(vec.at(10), Err(Error::IndexOutOfRange { .. })));
    /// ```
    #[inline]
    pub fn at(&self, index: usize) -> Result<Option<&B>> {
        self.check_bounds("at", index)?;
        Ok(self.get(index))
    }

    /// Returns the occupant of slot `index` for mutation, or `None` if the slot is free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if `index >= len()`.
    #[inline]
    pub fn at_mut(&mut self, index: usize) -> Result<Option<&mut B>> {
        self.check_bounds("at_mut", index)?;
        Ok(self.get_mut(index))
    }

    /// Returns the occupant of slot `index`, or `None` if the slot is free or does not
    /// exist.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&B> {
        let dispatch = (*self.dispatch.get(index)?)?;
        let object = dispatch.upcast(self.slot_ptr(self.start_of(index)));

        // SAFETY: The slot is live, so the object is initialized. The shared borrow of the
        // container prevents any mutation for the lifetime of the reference.
        Some(unsafe { object.as_ref() })
    }

    /// Returns the occupant of slot `index` for mutation, or `None` if the slot is free or
    /// does not exist.
    #[must_use]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut B> {
        let dispatch = (*self.dispatch.get(index)?)?;
        let mut object = dispatch.upcast(self.slot_ptr(self.start_of(index)));

        // SAFETY: The slot is live, so the object is initialized. The exclusive borrow of
        // the container guarantees no other reference to the object exists.
        Some(unsafe { object.as_mut() })
    }

    /// Returns the occupant of slot `index` without bounds checking, or `None` if the slot
    /// is free.
    ///
    /// # Safety
    ///
    /// `index` must be less than [`len()`](Self::len). Calling this with an out-of-range
    /// index is undefined behavior.
    #[must_use]
    #[inline]
    pub unsafe fn get_unchecked(&self, index: usize) -> Option<&B> {
        debug_assert!(index < self.len(), "get_unchecked({index}) out of range");

        // SAFETY: Forwarding the bounds guarantee from the caller.
        let dispatch = (*unsafe { self.dispatch.get_unchecked(index) })?;

        // SAFETY: Forwarding the bounds guarantee from the caller.
        let units = *unsafe { self.offsets.get_unchecked(index) };

        let start = units.to_usize().wrapping_mul(self.granularity.unit());
        let object = dispatch.upcast(self.slot_ptr(start));

        // SAFETY: The slot is live and the shared borrow of the container prevents mutation.
        Some(unsafe { object.as_ref() })
    }

    /// Returns the occupant of slot `index` for mutation without bounds checking, or `None`
    /// if the slot is free.
    ///
    /// # Safety
    ///
    /// `index` must be less than [`len()`](Self::len). Calling this with an out-of-range
    /// index is undefined behavior.
    #[must_use]
    #[inline]
    pub unsafe fn get_unchecked_mut(&mut self, index: usize) -> Option<&mut B> {
        debug_assert!(index < self.len(), "get_unchecked_mut({index}) out of range");

        // SAFETY: Forwarding the bounds guarantee from the caller.
        let dispatch = (*unsafe { self.dispatch.get_unchecked(index) })?;

        // SAFETY: Forwarding the bounds guarantee from the caller.
        let units = *unsafe { self.offsets.get_unchecked(index) };

        let start = units.to_usize().wrapping_mul(self.granularity.unit());
        let mut object = dispatch.upcast(self.slot_ptr(start));

        // SAFETY: The slot is live and the exclusive borrow of the container guarantees no
        // other reference to the object exists.
        Some(unsafe { object.as_mut() })
    }

    /// Whether slot `index` is free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if `index >= len()`.
    #[inline]
    pub fn is_free(&self, index: usize) -> Result<bool> {
        self.check_bounds("is_free", index)?;
        Ok(matches!(self.dispatch.get(index), Some(None)))
    }

    /// The capacity of slot `index` in bytes.
    ///
    /// This is at least the size of the occupant that created the slot, plus any alignment
    /// padding the next appended slot required. It never changes while the slot exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if `index >= len()`.
    #[inline]
    pub fn size_at(&self, index: usize) -> Result<usize> {
        self.check_bounds("size_at", index)?;

        // The slot table is non-decreasing and has an entry after every slot.
        Ok(self
            .start_of(index.wrapping_add(1))
            .wrapping_sub(self.start_of(index)))
    }

    /// The byte offset of slot `index` from the start of the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if `index >= len()`.
    #[inline]
    pub fn offset_at(&self, index: usize) -> Result<usize> {
        self.check_bounds("offset_at", index)?;
        Ok(self.start_of(index))
    }

    /// Moves `value` into a new slot at the end of the buffer, skipping the free list.
    ///
    /// Returns the index of the new slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] if the new slot would end beyond the maximum
    /// buffer size or if the slot index cannot be represented by the offset type. The
    /// value is dropped in that case.
    #[inline]
    pub fn push_back<T: Occupant<B>>(&mut self, value: T) -> Result<usize> {
        // SAFETY: The closure fully initializes the slot.
        unsafe {
            self.emplace_back_with(|uninit: &mut MaybeUninit<T>| {
                uninit.write(value);
            })
        }
    }

    /// Moves `value` into the first fitting free slot, or into a new slot at the end of the
    /// buffer if no free slot fits.
    ///
    /// Returns the index of the slot used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] if no free slot fits and the append fails. The
    /// value is dropped in that case.
    #[inline]
    pub fn push<T: Occupant<B>>(&mut self, value: T) -> Result<usize> {
        // SAFETY: The closure fully initializes the slot.
        unsafe {
            self.emplace_with(|uninit: &mut MaybeUninit<T>| {
                uninit.write(value);
            })
        }
    }

    /// Constructs an occupant with `f` directly into a new slot at the end of the buffer.
    ///
    /// `f` is only called once the slot has been secured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] under the same conditions as
    /// [`push_back()`](Self::push_back); `f` is not called in that case.
    #[inline]
    pub fn emplace_back<T: Occupant<B>>(&mut self, f: impl FnOnce() -> T) -> Result<usize> {
        // SAFETY: The closure fully initializes the slot.
        unsafe {
            self.emplace_back_with(|uninit: &mut MaybeUninit<T>| {
                uninit.write(f());
            })
        }
    }

    /// Constructs an occupant with `f` directly into the first fitting free slot, or into a
    /// new slot at the end of the buffer.
    ///
    /// `f` is only called once the slot has been secured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] under the same conditions as
    /// [`push()`](Self::push); `f` is not called in that case.
    #[inline]
    pub fn emplace<T: Occupant<B>>(&mut self, f: impl FnOnce() -> T) -> Result<usize> {
        // SAFETY: The closure fully initializes the slot.
        unsafe {
            self.emplace_with(|uninit: &mut MaybeUninit<T>| {
                uninit.write(f());
            })
        }
    }

    /// Initializes an occupant in place through a `&mut MaybeUninit<T>` in a new slot at
    /// the end of the buffer.
    ///
    /// This allows partial initialization of types that tolerate it, without an
    /// intermediate move.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] under the same conditions as
    /// [`push_back()`](Self::push_back); `f` is not called in that case.
    ///
    /// # Safety
    ///
    /// The closure must leave the `MaybeUninit<T>` in a state that is valid to use and to
    /// drop as a `T`.
    pub unsafe fn emplace_back_with<T: Occupant<B>>(
        &mut self,
        f: impl FnOnce(&mut MaybeUninit<T>),
    ) -> Result<usize> {
        // SAFETY: Forwarding the initialization guarantee from the caller.
        unsafe { self.insert_with(false, f) }
    }

    /// Initializes an occupant in place through a `&mut MaybeUninit<T>` in the first fitting
    /// free slot, or in a new slot at the end of the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] under the same conditions as
    /// [`push()`](Self::push); `f` is not called in that case.
    ///
    /// # Safety
    ///
    /// The closure must leave the `MaybeUninit<T>` in a state that is valid to use and to
    /// drop as a `T`.
    pub unsafe fn emplace_with<T: Occupant<B>>(
        &mut self,
        f: impl FnOnce(&mut MaybeUninit<T>),
    ) -> Result<usize> {
        // SAFETY: Forwarding the initialization guarantee from the caller.
        unsafe { self.insert_with(true, f) }
    }

    /// Copies a raw byte image of an occupant into a new slot at the end of the buffer,
    /// without running any constructor.
    ///
    /// The slot is sized by `bytes.len()` and aligned to the larger of `align` and the
    /// alignment recorded in `dispatch`, which describes the concrete type the bytes represent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] under the same conditions as
    /// [`push_back()`](Self::push_back).
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two or if `bytes` is shorter than the size recorded
    /// in `dispatch`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// 1. `bytes` is a valid bit pattern for a value of the type `dispatch` was created for.
    /// 2. Ownership of that value is transferred to the container: the original must not be
    ///    used or dropped afterwards (e.g. it was wrapped in [`std::mem::ManuallyDrop`]).
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::mem::ManuallyDrop;
    ///
    /// use poly_vec::{Dispatch, PolyVec};
    ///
    /// let mut vec = PolyVec::<String>::new();
    ///
    /// let value = ManuallyDrop::new("moved as bytes".to_string());
    /// // SAFETY: The pointer is valid for reads of the whole value.
    /// let bytes = unsafe {
    ///     std::slice::from_raw_parts(
    ///         (&raw const *value).cast::<u8>(),
    ///         size_of::<String>(),
    ///     )
    /// };
    ///
    /// // SAFETY: The bytes form a valid String whose ownership we hand over.
    /// let index =
    ///     unsafe { vec.memplace_back(bytes, align_of::<String>(), Dispatch::of::<String>()) }
    ///         .unwrap();
    ///
    /// assert_eq!(vec[index], "moved as bytes");
    /// ```
    pub unsafe fn memplace_back(
        &mut self,
        bytes: &[u8],
        align: usize,
        dispatch: Dispatch<B>,
    ) -> Result<usize> {
        // SAFETY: Forwarding the guarantees from the caller.
        unsafe { self.insert_bytes(false, bytes, align, dispatch) }
    }

    /// Copies a raw byte image of an occupant into the first fitting free slot, or into a
    /// new slot at the end of the buffer, without running any constructor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] under the same conditions as
    /// [`push()`](Self::push).
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two or if `bytes` is shorter than the size recorded
    /// in `dispatch`.
    ///
    /// # Safety
    ///
    /// Same as [`memplace_back()`](Self::memplace_back).
    pub unsafe fn memplace(
        &mut self,
        bytes: &[u8],
        align: usize,
        dispatch: Dispatch<B>,
    ) -> Result<usize> {
        // SAFETY: Forwarding the guarantees from the caller.
        unsafe { self.insert_bytes(true, bytes, align, dispatch) }
    }

    /// Drops the occupant of slot `index` and makes the slot available for reuse.
    ///
    /// The slot keeps its byte range; other slots are not affected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if `index >= len()` and [`Error::SlotVacant`] if
    /// the slot is already free. The container is not modified in either case.
    pub fn free(&mut self, index: usize) -> Result<()> {
        self.check_bounds("free", index)?;

        let start = self.start_of(index);
        let index_units = O::from_usize(index)
            .expect("slot indices are checked against the offset type when slots are created");

        let dispatch = self
            .dispatch
            .get_mut(index)
            .expect("index was bounds-checked above")
            .take()
            .ok_or(Error::SlotVacant {
                operation: "free",
                index,
            })?;

        // Bookkeeping first, so a panicking destructor leaves a consistent free slot.
        self.free_indices.push(index_units);

        // SAFETY: The slot was live with this dispatch handle and is now marked free, so the
        // object will never be used or dropped again.
        unsafe {
            dispatch.drop_in_place(self.slot_ptr(start));
        }

        #[cfg(debug_assertions)]
        self.integrity_check();

        Ok(())
    }

    /// Drops every live occupant and resets the container to its initial, slot-less state.
    ///
    /// The buffer keeps its capacity; use [`clear()`](Self::clear) to release it.
    pub fn free_all(&mut self) {
        let unit = self.granularity.unit();
        let base = self.buffer.ptr();

        let mut dispatch = mem::take(&mut self.dispatch);
        let mut offsets = mem::replace(&mut self.offsets, vec![O::ZERO]);
        self.free_indices.clear();

        // The container is already reset, so if a destructor panics, the remaining
        // occupants are leaked rather than dropped twice.
        for (slot, units) in dispatch.drain(..).zip(offsets.iter()) {
            let Some(slot) = slot else {
                continue;
            };

            // SAFETY: The offset belongs to a slot that is within the buffer.
            let object = unsafe { base.add(units.to_usize().wrapping_mul(unit)) };

            // SAFETY: The slot was live with this dispatch handle and has been removed from
            // the container, so the object will never be used or dropped again.
            unsafe {
                slot.drop_in_place(object);
            }
        }

        // Hand the original allocations back to keep their capacity.
        offsets.clear();
        offsets.push(O::ZERO);
        self.offsets = offsets;
        self.dispatch = dispatch;

        #[cfg(debug_assertions)]
        self.integrity_check();
    }

    /// Drops every live occupant, resets the container and releases the buffer memory.
    pub fn clear(&mut self) {
        self.free_all();
        self.buffer.release();
    }

    /// Reserves room for at least `additional_bytes` more bytes of occupants and
    /// `additional_slots` more slots.
    ///
    /// The byte reservation is capped at the maximum buffer size. This is purely a
    /// performance hint and has no observable effect on the contents.
    #[cfg_attr(test, mutants::skip)] // Pure capacity hint, no observable contract.
    pub fn reserve(&mut self, additional_bytes: usize, additional_slots: usize) {
        let used = self.bump_offset();
        let required = used
            .saturating_add(additional_bytes)
            .min(self.max_buffer_size);

        self.buffer
            .ensure(required, self.buffer.align(), used, self.max_buffer_size);

        self.offsets.reserve(additional_slots);
        self.dispatch.reserve(additional_slots);
        self.free_indices.reserve(additional_slots);
    }

    /// Releases unused capacity from the buffer, the slot table and the free list.
    ///
    /// Occupants and slot indices are unaffected, although the buffer may move.
    #[cfg_attr(test, mutants::skip)] // Pure capacity hint, no observable contract.
    pub fn shrink_to_fit(&mut self) {
        self.buffer.shrink_to(self.bump_offset());
        self.offsets.shrink_to_fit();
        self.dispatch.shrink_to_fit();
        self.free_indices.shrink_to_fit();
    }

    /// Iterates over the live occupants in slot order, skipping free slots.
    #[inline]
    pub fn iter(&self) -> Iter<'_, B, O> {
        Iter::new(self)
    }

    /// Iterates mutably over the live occupants in slot order, skipping free slots.
    #[inline]
    pub fn iter_mut(&mut self) -> IterMut<'_, B, O> {
        IterMut::new(
            self.buffer.ptr(),
            self.granularity.unit(),
            &self.offsets,
            &self.dispatch,
        )
    }

    /// Iterates over the indices of live slots in ascending order.
    #[inline]
    pub fn indices(&self) -> Indices<'_, B> {
        Indices::new(&self.dispatch)
    }

    /// Byte offset of slot table entry `index`, which may be the bump entry.
    #[inline]
    fn start_of(&self, index: usize) -> usize {
        let units = *self
            .offsets
            .get(index)
            .expect("slot table index was validated by the caller");

        // Cannot overflow: the byte offset was divided by the unit when stored.
        units.to_usize().wrapping_mul(self.granularity.unit())
    }

    #[inline]
    fn slot_ptr(&self, start: usize) -> NonNull<u8> {
        debug_assert!(start <= self.buffer.capacity() || start == 0);

        // SAFETY: Slot starts never exceed the bump offset, which never exceeds the buffer
        // capacity (zero-capacity buffers only ever see offset 0), so we stay within the
        // allocation or one past its end.
        unsafe { self.buffer.ptr().add(start) }
    }

    #[inline]
    fn check_bounds(&self, operation: &'static str, index: usize) -> Result<()> {
        if index >= self.len() {
            return Err(Error::IndexOutOfRange {
                operation,
                index,
                size: self.len(),
            });
        }

        Ok(())
    }

    /// # Safety
    ///
    /// The closure must leave the value in a state that is valid to use and drop as a `T`.
    unsafe fn insert_with<T: Occupant<B>>(
        &mut self,
        reuse: bool,
        f: impl FnOnce(&mut MaybeUninit<T>),
    ) -> Result<usize> {
        let target = self.prepare(Layout::new::<T>(), reuse)?;
        let mut slot = self.slot_ptr(target.start()).cast::<MaybeUninit<T>>();

        // SAFETY: prepare() guarantees the slot is within the buffer, aligned for T, large
        // enough for T and not occupied. We hold an exclusive reference to the container.
        f(unsafe { slot.as_mut() });

        Ok(self.commit(target, Dispatch::of::<T>()))
    }

    /// # Safety
    ///
    /// `bytes` must be a valid image of an owned value of the type `dispatch` describes.
    unsafe fn insert_bytes(
        &mut self,
        reuse: bool,
        bytes: &[u8],
        align: usize,
        dispatch: Dispatch<B>,
    ) -> Result<usize> {
        assert!(
            bytes.len() >= dispatch.layout().size(),
            "byte image of {} bytes cannot hold {:?}",
            bytes.len(),
            dispatch.layout()
        );

        // The slot must satisfy the concrete type even if the caller asked for less.
        let layout = Layout::from_size_align(bytes.len(), align.max(dispatch.layout().align()))
            .expect("alignment must be a power of two and the size must fit in isize");

        let target = self.prepare(layout, reuse)?;
        let slot = self.slot_ptr(target.start());

        // SAFETY: prepare() reserved bytes.len() bytes at the slot. The source is a shared
        // borrow that cannot alias the buffer while we hold an exclusive reference to it.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), slot.as_ptr(), bytes.len());
        }

        Ok(self.commit(target, dispatch))
    }

    /// Finds a place for an occupant with the given layout and makes sure the buffer can
    /// hold it. Does not modify the slot table or the free list.
    fn prepare(&mut self, layout: Layout, reuse: bool) -> Result<Target<O>> {
        let align = layout.align().max(self.granularity.unit());
        let used = self.bump_offset();

        if reuse {
            if let Some(target) = self.find_free_slot(layout.size(), align) {
                // The slot already lies within the buffer but the base may need realigning.
                self.buffer.ensure(used, align, used, self.max_buffer_size);
                return Ok(target);
            }
        }

        let target = self.plan_append(layout.size(), align)?;

        let Target::Append { end_units, .. } = target else {
            unreachable!("plan_append() only plans appends");
        };

        let end = end_units.to_usize().wrapping_mul(self.granularity.unit());
        self.buffer.ensure(end, align, used, self.max_buffer_size);

        Ok(target)
    }

    /// First-fit scan of the free list.
    fn find_free_slot(&self, size: usize, align: usize) -> Option<Target<O>> {
        let align_mask = align.wrapping_sub(1);

        self.free_indices
            .iter()
            .enumerate()
            .find_map(|(position, index)| {
                let index = index.to_usize();
                let start = self.start_of(index);
                let end = self.start_of(index.wrapping_add(1));

                (start & align_mask == 0 && end.wrapping_sub(start) >= size).then_some(
                    Target::Reuse {
                        position,
                        index,
                        start,
                    },
                )
            })
    }

    fn plan_append(&self, size: usize, align: usize) -> Result<Target<O>> {
        let exceeded = |requested: usize| {
            log::debug!(
                "refusing append: end offset {requested} exceeds the limit of {} bytes",
                self.max_buffer_size
            );

            Error::CapacityExceeded {
                requested,
                limit: self.max_buffer_size,
            }
        };

        let bump = self.bump_offset();
        let align_mask = align.wrapping_sub(1);

        let start = bump
            .checked_add(align_mask)
            .map(|padded| padded & !align_mask)
            .ok_or_else(|| exceeded(usize::MAX))?;
        let size = self
            .granularity
            .round_up(size)
            .ok_or_else(|| exceeded(usize::MAX))?;

        // An end that wraps around below the start is the overflow signal.
        let end = start.checked_add(size).ok_or_else(|| exceeded(usize::MAX))?;

        if end > self.max_buffer_size {
            return Err(exceeded(end));
        }

        let (Some(start_units), Some(end_units)) = (self.to_units(start), self.to_units(end))
        else {
            return Err(exceeded(end));
        };

        // The free list stores slot indices with the offset type as well.
        let index = self.len();

        if O::from_usize(index).is_none() {
            log::debug!("refusing append: slot index {index} does not fit {:?}", O::WIDTH);

            // Both numbers count slots: indices 0..=max_usize() are addressable.
            return Err(Error::CapacityExceeded {
                requested: index.saturating_add(1),
                limit: O::max_usize().saturating_add(1),
            });
        }

        Ok(Target::Append {
            index,
            start,
            start_units,
            end_units,
        })
    }

    fn to_units(&self, bytes: usize) -> Option<O> {
        O::from_usize(bytes.checked_div(self.granularity.unit())?)
    }

    fn commit(&mut self, target: Target<O>, dispatch: Dispatch<B>) -> usize {
        let index = match target {
            Target::Reuse {
                position, index, ..
            } => {
                self.free_indices.swap_remove(position);

                let slot = self
                    .dispatch
                    .get_mut(index)
                    .expect("free list only holds existing slots");

                debug_assert!(slot.is_none(), "free list pointed at live slot {index}");
                *slot = Some(dispatch);

                index
            }
            Target::Append {
                index,
                start_units,
                end_units,
                ..
            } => {
                // Alignment padding in front of the new slot goes to its predecessor.
                *self
                    .offsets
                    .last_mut()
                    .expect("slot table always holds the bump entry") = start_units;

                self.offsets.push(end_units);
                self.dispatch.push(Some(dispatch));

                index
            }
        };

        #[cfg(debug_assertions)]
        self.integrity_check();

        index
    }

    /// Verifies the structural invariants of the container, panicking on violation.
    ///
    /// This method is only available in debug builds and is used for testing and validation.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    pub(crate) fn integrity_check(&self) {
        assert_eq!(
            self.offsets.len(),
            self.dispatch.len().wrapping_add(1),
            "slot table must hold one entry per slot plus the bump entry"
        );

        assert!(
            self.offsets.is_sorted(),
            "slot table must be non-decreasing: {:?}",
            self.offsets
        );

        let bump = self.bump_offset();

        assert!(
            bump <= self.max_buffer_size,
            "bump offset {bump} exceeds the limit of {}",
            self.max_buffer_size
        );

        assert!(
            bump == 0 || bump <= self.buffer.capacity(),
            "bump offset {bump} exceeds the buffer capacity {}",
            self.buffer.capacity()
        );

        let mut in_free_list = vec![false; self.len()];

        for index in &self.free_indices {
            let index = index.to_usize();

            assert!(
                matches!(self.dispatch.get(index), Some(None)),
                "free list entry {index} does not refer to a free slot"
            );

            let seen = in_free_list
                .get_mut(index)
                .expect("index was validated against the slot count above");

            assert!(!*seen, "slot {index} is in the free list more than once");
            *seen = true;
        }

        let free_slots = self.dispatch.iter().filter(|slot| slot.is_none()).count();

        assert_eq!(
            free_slots,
            self.free_indices.len(),
            "every free slot must be in the free list"
        );
    }
}

impl<B: ?Sized, O: Offset> Default for PolyVec<B, O> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ?Sized, O: Offset> Drop for PolyVec<B, O> {
    fn drop(&mut self) {
        let live = self.live_len();

        self.clear();

        // We do this check at the end so we clean up first. If we are already panicking, we
        // do not want to panic again because that would obscure the original panic.
        if !thread::panicking() && matches!(self.drop_policy, DropPolicy::MustNotDropItems) {
            assert!(
                live == 0,
                "dropped a PolyVec with {live} live occupants - this is forbidden by DropPolicy::MustNotDropItems"
            );
        }
    }
}

impl<B: ?Sized, O: Offset> Index<usize> for PolyVec<B, O> {
    type Output = B;

    /// # Panics
    ///
    /// Panics if `index` is out of range or the slot is free.
    fn index(&self, index: usize) -> &B {
        match self.at(index) {
            Ok(Some(occupant)) => occupant,
            Ok(None) => panic!("poly_vec::index(): slot {index} is free"),
            Err(error) => panic!("{error}"),
        }
    }
}

impl<B: ?Sized, O: Offset> IndexMut<usize> for PolyVec<B, O> {
    /// # Panics
    ///
    /// Panics if `index` is out of range or the slot is free.
    fn index_mut(&mut self, index: usize) -> &mut B {
        match self.at_mut(index) {
            Ok(Some(occupant)) => occupant,
            Ok(None) => panic!("poly_vec::index_mut(): slot {index} is free"),
            Err(error) => panic!("{error}"),
        }
    }
}

impl<'a, B: ?Sized, O: Offset> IntoIterator for &'a PolyVec<B, O> {
    type Item = &'a B;
    type IntoIter = Iter<'a, B, O>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, B: ?Sized, O: Offset> IntoIterator for &'a mut PolyVec<B, O> {
    type Item = &'a mut B;
    type IntoIter = IterMut<'a, B, O>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

impl<B: ?Sized, O: Offset> fmt::Debug for PolyVec<B, O> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolyVec")
            .field("len", &self.len())
            .field("live_len", &self.live_len())
            .field("bump_offset", &self.bump_offset())
            .field("buffer_capacity", &self.buffer.capacity())
            .field("offset_width", &O::WIDTH)
            .field("granularity", &self.granularity)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("drop_policy", &self.drop_policy)
            .finish_non_exhaustive()
    }
}

// SAFETY: The container exclusively owns its buffer and every occupant in it; the raw
// pointer only refers to that owned allocation. Moving the container to another thread
// moves the occupants with it, which is sound exactly when the occupants are `Send`.
unsafe impl<B: ?Sized + Send, O: Offset> Send for PolyVec<B, O> {}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::cell::Cell;
    use std::fmt::Debug;
    use std::mem::ManuallyDrop;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;
    use std::slice;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::occupant;

    assert_impl_all!(PolyVec<u64>: Send, Debug, Default);
    assert_impl_all!(PolyVec<dyn Debug + Send>: Send);
    assert_not_impl_any!(PolyVec<dyn Debug>: Send, Sync);
    assert_not_impl_any!(PolyVec<u64>: Sync);

    #[derive(Debug)]
    struct Byte(u8);

    #[derive(Debug)]
    struct Word(u64);

    #[derive(Debug)]
    struct Bytes4([u8; 4]);

    #[derive(Debug)]
    struct Bytes12([u8; 12]);

    #[derive(Debug)]
    #[repr(align(32))]
    struct Aligned32(u8);

    #[derive(Debug)]
    struct Counted {
        drops: Rc<Cell<usize>>,
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    occupant!(dyn Debug: Byte, Word, Bytes4, Bytes12, Aligned32, Counted);
    occupant!(dyn Debug + Send: String);

    fn address_of(occupant: &dyn Debug) -> usize {
        ptr::from_ref(occupant).cast::<u8>().addr()
    }

    fn image<T>(value: &ManuallyDrop<T>) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(value).cast::<u8>(), size_of::<T>()) }
    }

    #[test]
    fn smoke_test() {
        let mut vec = PolyVec::<dyn Debug>::new();

        assert_eq!(vec.len(), 0);
        assert!(vec.is_empty());
        assert_eq!(vec.bump_offset(), 0);

        let a = vec.push_back(Byte(1)).unwrap();
        let b = vec.push_back(Word(2)).unwrap();

        assert_eq!(vec.len(), 2);
        assert_eq!(vec.live_len(), 2);
        assert!(!vec.is_empty());
        assert_eq!(format!("{:?}", &vec[a]), "Byte(1)");
        assert_eq!(format!("{:?}", &vec[b]), "Word(2)");
    }

    #[test]
    fn indices_increase_from_zero() {
        let mut vec = PolyVec::<dyn Debug>::new();

        assert_eq!(vec.push_back(Byte(1)).unwrap(), 0);
        assert_eq!(vec.push_back(Word(2)).unwrap(), 1);
        assert_eq!(vec.push(Byte(3)).unwrap(), 2);
        assert_eq!(vec.emplace(|| Word(4)).unwrap(), 3);
    }

    #[test]
    fn append_pads_to_alignment() {
        let mut vec = PolyVec::<dyn Debug>::new();

        vec.push_back(Byte(1)).unwrap();
        vec.push_back(Word(2)).unwrap();

        assert_eq!(vec.offset_at(0).unwrap(), 0);
        assert_eq!(vec.offset_at(1).unwrap(), 8);

        // The padding belongs to the predecessor.
        assert_eq!(vec.size_at(0).unwrap(), 8);
        assert_eq!(vec.size_at(1).unwrap(), 8);
        assert_eq!(vec.bump_offset(), 16);
    }

    #[test]
    fn occupants_are_aligned_in_memory() {
        let mut vec = PolyVec::<dyn Debug>::new();

        let mut aligned = Vec::new();

        for i in 0..50_u8 {
            vec.push_back(Byte(i)).unwrap();
            aligned.push(vec.push_back(Aligned32(i)).unwrap());
        }

        for (i, index) in aligned.into_iter().enumerate() {
            assert_eq!(vec.offset_at(index).unwrap() % 32, 0);
            assert_eq!(address_of(&vec[index]) % 32, 0);
            assert_eq!(format!("{:?}", &vec[index]), format!("Aligned32({i})"));
        }
    }

    #[test]
    fn growth_preserves_occupants() {
        let mut vec = PolyVec::<String>::new();

        for i in 0..1000 {
            vec.push_back(i.to_string()).unwrap();
        }

        for i in 0..1000 {
            assert_eq!(vec[i], i.to_string());
        }
    }

    #[test]
    fn free_marks_slot_and_drops_occupant() {
        let drops = Rc::new(Cell::new(0));
        let mut vec = PolyVec::<dyn Debug>::new();

        let index = vec
            .push(Counted {
                drops: Rc::clone(&drops),
            })
            .unwrap();

        assert!(!vec.is_free(index).unwrap());

        vec.free(index).unwrap();

        assert_eq!(drops.get(), 1);
        assert!(vec.is_free(index).unwrap());
        assert!(vec.at(index).unwrap().is_none());
        assert!(vec.get(index).is_none());
        assert_eq!(vec.len(), 1);
        assert_eq!(vec.live_len(), 0);
        assert_eq!(vec.free_len(), 1);
    }

    #[test]
    fn free_of_free_slot_is_rejected() {
        let mut vec = PolyVec::<u64>::new();

        vec.push(1).unwrap();
        vec.free(0).unwrap();

        assert_eq!(
            vec.free(0),
            Err(Error::SlotVacant {
                operation: "free",
                index: 0
            })
        );
        assert_eq!(vec.free_len(), 1);
    }

    #[test]
    fn checked_operations_reject_out_of_range_index() {
        let mut vec = PolyVec::<u64>::new();

        for value in 0..3 {
            vec.push(value).unwrap();
        }

        let expected = |operation| {
            Err(Error::IndexOutOfRange {
                operation,
                index: 3,
                size: 3,
            })
        };

        assert_eq!(vec.at(3).map(|_| ()), expected("at"));
        assert_eq!(vec.at_mut(3).map(|_| ()), expected("at_mut"));
        assert_eq!(vec.is_free(3).map(|_| ()), expected("is_free"));
        assert_eq!(vec.size_at(3).map(|_| ()), expected("size_at"));
        assert_eq!(vec.offset_at(3).map(|_| ()), expected("offset_at"));
        assert_eq!(vec.free(3), expected("free"));
        assert!(vec.get(3).is_none());

        assert_eq!(vec.live_len(), 3);
    }

    #[test]
    fn out_of_range_error_message() {
        let vec = PolyVec::<u64>::new();

        let error = vec.at(0).unwrap_err();
        assert_eq!(error.to_string(), "poly_vec::at(): index 0 not less than size 0");
    }

    #[test]
    fn push_reuses_fitting_free_slot() {
        let mut vec = PolyVec::<dyn Debug>::new();

        vec.push_back(Word(1)).unwrap();
        vec.push_back(Word(2)).unwrap();
        vec.free(0).unwrap();

        let reused = vec.push(Byte(3)).unwrap();

        assert_eq!(reused, 0);
        assert_eq!(vec.offset_at(0).unwrap(), 0);
        assert_eq!(vec.len(), 2);
        assert_eq!(vec.free_len(), 0);
        assert_eq!(format!("{:?}", &vec[0]), "Byte(3)");

        // Nothing left to reuse.
        assert_eq!(vec.push(Word(4)).unwrap(), 2);
        assert_eq!(vec.offset_at(2).unwrap(), 16);
    }

    #[test]
    fn push_skips_slot_that_is_too_small() {
        let mut vec = PolyVec::<dyn Debug>::new();

        vec.push_back(Byte(1)).unwrap();
        vec.push_back(Byte(2)).unwrap();
        vec.free(0).unwrap();

        assert_eq!(vec.push(Word(3)).unwrap(), 2);
        assert!(vec.is_free(0).unwrap());
        assert_eq!(vec.free_len(), 1);
    }

    #[test]
    fn push_skips_slot_that_is_misaligned() {
        let mut vec = PolyVec::<dyn Debug>::new();

        vec.push_back(Bytes4([1; 4])).unwrap();
        vec.push_back(Bytes12([2; 12])).unwrap();
        vec.push_back(Byte(3)).unwrap();
        vec.free(1).unwrap();

        assert_eq!(vec.offset_at(1).unwrap(), 4);
        assert_eq!(vec.size_at(1).unwrap(), 12);

        // Large enough but starts at offset 4, which is not suitable for an 8-aligned type.
        let word = vec.push(Word(4)).unwrap();
        assert_eq!(word, 3);
        assert_eq!(vec.offset_at(word).unwrap(), 24);

        // A byte-aligned type fits.
        assert_eq!(vec.push(Bytes12([5; 12])).unwrap(), 1);
    }

    #[test]
    fn reuse_takes_first_fitting_free_list_entry() {
        let mut vec = PolyVec::<u64>::new();

        for value in 0..3 {
            vec.push_back(value).unwrap();
        }

        vec.free(2).unwrap();
        vec.free(0).unwrap();

        assert_eq!(vec.push(10).unwrap(), 2);
        assert_eq!(vec.push(11).unwrap(), 0);
        assert_eq!(vec.push(12).unwrap(), 3);
    }

    #[test]
    fn back_variants_never_reuse() {
        let mut vec = PolyVec::<u64>::new();

        vec.push_back(1).unwrap();
        vec.free(0).unwrap();

        assert_eq!(vec.push_back(2).unwrap(), 1);
        assert_eq!(vec.emplace_back(|| 3).unwrap(), 2);
        assert!(vec.is_free(0).unwrap());
    }

    #[test]
    fn freeing_only_occupant_makes_container_empty() {
        let mut vec = PolyVec::<dyn Debug>::new();

        vec.push(Word(1)).unwrap();
        vec.free(0).unwrap();

        assert!(vec.is_empty());
        assert_eq!(vec.len(), 1);
        assert_eq!(vec.iter().count(), 0);
    }

    #[test]
    fn free_all_resets_slots_and_keeps_buffer() {
        let drops = Rc::new(Cell::new(0));
        let mut vec = PolyVec::<dyn Debug>::new();

        for _ in 0..3 {
            vec.push(Counted {
                drops: Rc::clone(&drops),
            })
            .unwrap();
        }
        vec.free(1).unwrap();
        assert_eq!(drops.get(), 1);

        let capacity = vec.buffer_capacity();
        vec.free_all();

        assert_eq!(drops.get(), 3);
        assert_eq!(vec.len(), 0);
        assert_eq!(vec.free_len(), 0);
        assert_eq!(vec.bump_offset(), 0);
        assert_eq!(vec.buffer_capacity(), capacity);

        let index = vec.push(Byte(1)).unwrap();
        assert_eq!(index, 0);
        assert_eq!(vec.offset_at(index).unwrap(), 0);
    }

    #[test]
    fn clear_releases_buffer() {
        let drops = Rc::new(Cell::new(0));
        let mut vec = PolyVec::<dyn Debug>::new();

        vec.push(Counted {
            drops: Rc::clone(&drops),
        })
        .unwrap();
        vec.clear();

        assert_eq!(drops.get(), 1);
        assert_eq!(vec.len(), 0);
        assert_eq!(vec.buffer_capacity(), 0);

        assert_eq!(vec.push(Word(5)).unwrap(), 0);
    }

    #[test]
    fn dropping_container_drops_live_occupants_once() {
        let drops = Rc::new(Cell::new(0));

        {
            let mut vec = PolyVec::<dyn Debug>::new();

            for _ in 0..4 {
                vec.push(Counted {
                    drops: Rc::clone(&drops),
                })
                .unwrap();
            }

            vec.free(2).unwrap();
            assert_eq!(drops.get(), 1);
        }

        assert_eq!(drops.get(), 4);
    }

    #[test]
    fn emplace_runs_constructor_in_slot() {
        let mut vec = PolyVec::<dyn Debug>::new();

        let index = vec.emplace_back(|| Word(42)).unwrap();
        assert_eq!(format!("{:?}", &vec[index]), "Word(42)");
    }

    #[test]
    fn emplace_with_initializes_in_place() {
        let mut vec = PolyVec::<u64>::new();

        let index = unsafe {
            vec.emplace_with(|uninit: &mut MaybeUninit<u64>| {
                uninit.write(7);
            })
        }
        .unwrap();

        assert_eq!(vec[index], 7);
    }

    #[test]
    fn failed_insert_does_not_call_constructor() {
        let mut vec = PolyVec::<[u8; 200], u8>::new();
        vec.push([0; 200]).unwrap();

        let result = vec.emplace(|| -> [u8; 200] { panic!("must not be called") });

        assert!(matches!(result, Err(Error::CapacityExceeded { .. })));
        assert_eq!(vec.len(), 1);
    }

    #[test]
    fn panicking_constructor_leaves_container_consistent() {
        let mut vec = PolyVec::<u64>::new();
        vec.push(1).unwrap();

        let result = catch_unwind(AssertUnwindSafe(|| {
            vec.emplace(|| -> u64 { panic!("constructor failed") })
        }));

        assert!(result.is_err());
        assert_eq!(vec.len(), 1);
        assert_eq!(vec.push(2).unwrap(), 1);
        assert_eq!(vec[1], 2);
    }

    #[test]
    fn memplace_back_adopts_byte_image() {
        let mut vec = PolyVec::<String>::new();

        let value = ManuallyDrop::new("adopted".to_string());
        let index = unsafe {
            vec.memplace_back(image(&value), align_of::<String>(), Dispatch::of::<String>())
        }
        .unwrap();

        assert_eq!(vec[index], "adopted");
        assert_eq!(vec.size_at(index).unwrap(), size_of::<String>());
    }

    #[test]
    fn memplace_reuses_free_slot() {
        let mut vec = PolyVec::<String>::new();

        vec.push_back("first".to_string()).unwrap();
        vec.push_back("second".to_string()).unwrap();
        vec.free(0).unwrap();

        let value = ManuallyDrop::new("third".to_string());
        let index = unsafe {
            vec.memplace(image(&value), align_of::<String>(), Dispatch::of::<String>())
        }
        .unwrap();

        assert_eq!(index, 0);
        assert_eq!(vec[0], "third");
        assert_eq!(vec[1], "second");
    }

    #[test]
    fn memplace_aligns_to_dispatch_even_if_caller_asks_for_less() {
        let mut vec = PolyVec::<dyn Debug>::new();

        let byte = ManuallyDrop::new(Byte(7));
        let word = ManuallyDrop::new(Word(0x0102_0304_0506_0708));

        let first =
            unsafe { vec.memplace_back(image(&byte), 1, Dispatch::of::<Byte>()) }.unwrap();
        let second =
            unsafe { vec.memplace_back(image(&word), 1, Dispatch::of::<Word>()) }.unwrap();

        assert_eq!(vec.offset_at(first).unwrap(), 0);
        assert_eq!(vec.offset_at(second).unwrap() % align_of::<Word>(), 0);
        assert_eq!(address_of(&vec[second]) % align_of::<Word>(), 0);
        assert_eq!(format!("{:?}", &vec[second]), "Word(72623859790382856)");

        // The padding went to the first slot, which can now hold a word on reuse.
        vec.free(first).unwrap();
        let third = unsafe { vec.memplace(image(&word), 1, Dispatch::of::<Word>()) }.unwrap();
        assert_eq!(third, first);
        assert_eq!(format!("{:?}", &vec[third]), "Word(72623859790382856)");
    }

    #[test]
    #[should_panic]
    fn memplace_rejects_image_smaller_than_dispatch() {
        let mut vec = PolyVec::<dyn Debug>::new();

        let byte = ManuallyDrop::new(Byte(7));

        _ = unsafe {
            vec.memplace_back(image(&byte), align_of::<Word>(), Dispatch::of::<Word>())
        };
    }

    #[test]
    fn word_granularity_rounds_slots_to_words() {
        let word = size_of::<usize>();
        let mut vec = PolyVec::<dyn Debug, u8>::builder()
            .granularity(Granularity::Word)
            .build();

        vec.push_back(Byte(1)).unwrap();
        vec.push_back(Bytes4([2; 4])).unwrap();

        assert_eq!(vec.size_at(0).unwrap(), word);
        assert_eq!(vec.offset_at(1).unwrap(), word);
        assert_eq!(vec.bump_offset(), 2 * word);
        assert_eq!(format!("{:?}", &vec[1]), "Bytes4([2, 2, 2, 2])");
    }

    #[test]
    fn narrow_offsets_reject_overflowing_append() {
        let mut vec = PolyVec::<[u8; 100], u8>::new();

        vec.push([1; 100]).unwrap();
        vec.push([2; 100]).unwrap();

        assert_eq!(
            vec.push([3; 100]),
            Err(Error::CapacityExceeded {
                requested: 300,
                limit: 255
            })
        );

        assert_eq!(vec.len(), 2);
        assert_eq!(vec[1], [2; 100]);

        // Reuse does not need more room.
        vec.free(0).unwrap();
        assert_eq!(vec.push([4; 100]).unwrap(), 0);
    }

    #[test]
    fn explicit_limit_rejects_overflowing_append() {
        let mut vec = PolyVec::<u64>::builder().max_buffer_size(16).build();

        vec.push(1).unwrap();
        vec.push(2).unwrap();

        assert!(matches!(
            vec.push(3),
            Err(Error::CapacityExceeded {
                requested: 24,
                limit: 16
            })
        ));
    }

    #[test]
    fn slot_count_is_limited_by_offset_type() {
        let mut vec = PolyVec::<(), u8>::new();

        for expected in 0..256 {
            assert_eq!(vec.push_back(()).unwrap(), expected);
        }

        assert_eq!(
            vec.push_back(()),
            Err(Error::CapacityExceeded {
                requested: 257,
                limit: 256
            })
        );

        // Free slots can still be reused.
        vec.free(255).unwrap();
        assert_eq!(vec.push(()).unwrap(), 255);
    }

    #[test]
    fn zero_sized_occupants_share_offsets() {
        let mut vec = PolyVec::<()>::new();

        vec.push(()).unwrap();
        vec.push(()).unwrap();

        assert_eq!(vec.offset_at(0).unwrap(), 0);
        assert_eq!(vec.offset_at(1).unwrap(), 0);
        assert_eq!(vec.size_at(0).unwrap(), 0);
        assert_eq!(vec.bump_offset(), 0);
        assert_eq!(vec.iter().count(), 2);
    }

    #[test]
    fn at_mut_allows_modification() {
        let mut vec = PolyVec::<String>::new();
        let index = vec.push("a".to_string()).unwrap();

        vec.at_mut(index).unwrap().unwrap().push('b');
        vec[index].push('c');
        vec.get_mut(index).unwrap().push('d');

        assert_eq!(vec[index], "abcd");
    }

    #[test]
    fn get_unchecked_returns_live_occupants() {
        let mut vec = PolyVec::<u32>::new();

        vec.push(1).unwrap();
        vec.push(2).unwrap();
        vec.free(0).unwrap();

        unsafe {
            assert!(vec.get_unchecked(0).is_none());
            assert_eq!(vec.get_unchecked(1), Some(&2));

            *vec.get_unchecked_mut(1).unwrap() = 3;
        }

        assert_eq!(vec[1], 3);
    }

    #[test]
    #[should_panic]
    fn index_of_free_slot_panics() {
        let mut vec = PolyVec::<u32>::new();

        vec.push(1).unwrap();
        vec.free(0).unwrap();

        _ = vec[0];
    }

    #[test]
    #[should_panic]
    fn index_out_of_range_panics() {
        let vec = PolyVec::<u32>::new();
        _ = vec[0];
    }

    #[test]
    fn reserve_and_shrink_preserve_contents() {
        let mut vec = PolyVec::<dyn Debug>::new();

        vec.reserve(4096, 100);
        assert!(vec.buffer_capacity() >= 4096);
        assert!(vec.slot_capacity() >= 100);

        vec.push(Word(1)).unwrap();
        vec.push(Aligned32(2)).unwrap();

        vec.shrink_to_fit();

        assert_eq!(vec.buffer_capacity(), vec.bump_offset());
        assert_eq!(format!("{:?}", &vec[0]), "Word(1)");
        assert_eq!(format!("{:?}", &vec[1]), "Aligned32(2)");
        assert_eq!(address_of(&vec[1]) % 32, 0);
    }

    #[test]
    fn reserve_is_capped_at_limit() {
        let mut vec = PolyVec::<u8, u8>::new();

        vec.reserve(10_000, 0);
        assert!(vec.buffer_capacity() <= 255);
    }

    #[test]
    fn with_capacity_preallocates() {
        let vec = PolyVec::<dyn Debug>::with_capacity(1024, 16);

        assert!(vec.buffer_capacity() >= 1024);
        assert!(vec.slot_capacity() >= 16);
        assert!(vec.is_empty());
    }

    #[test]
    fn as_ptr_points_at_first_slot() {
        let mut vec = PolyVec::<u64>::new();
        vec.push(99).unwrap();

        assert_eq!(vec.as_ptr().addr(), ptr::from_ref(&vec[0]).addr());
    }

    #[test]
    fn drop_with_no_live_occupants_does_not_panic_if_policy_must_not_drop() {
        let mut vec = PolyVec::<u64>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        vec.push(1).unwrap();
        vec.free(0).unwrap();

        drop(vec);
    }

    #[test]
    #[should_panic]
    fn drop_with_live_occupants_panics_if_policy_must_not_drop() {
        let mut vec = PolyVec::<u64>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        vec.push(1).unwrap();

        drop(vec);
    }

    #[test]
    fn container_can_move_between_threads() {
        let mut vec = PolyVec::<dyn Debug + Send>::new();
        vec.push("moved".to_string()).unwrap();

        let handle = std::thread::spawn(move || format!("{:?}", &vec[0]));

        assert_eq!(handle.join().unwrap(), "\"moved\"");
    }

    #[test]
    fn debug_output_describes_container() {
        let vec = PolyVec::<u64, u16>::new();
        let output = format!("{vec:?}");

        assert!(output.contains("PolyVec"));
        assert!(output.contains("U16"));
    }
}
