use std::alloc::{Layout, alloc, dealloc, realloc};
use std::ptr::{self, NonNull};

/// Largest buffer size we ever allow. Keeping well below `isize::MAX` guarantees that every
/// size/alignment pair we request forms a valid [`Layout`], for any alignment a Rust type
/// can have.
pub(crate) const MAX_BUFFER_SIZE: usize = isize::MAX.unsigned_abs() >> 1;

/// Smallest non-zero capacity, to avoid a string of tiny reallocations for the first few
/// occupants.
const MIN_CAPACITY: usize = 64;

/// Growable, untyped storage for occupant bytes.
///
/// The base address is aligned to the strictest alignment requested so far. Raising the
/// alignment or growing the capacity may move the whole block to a new address; the first
/// `used` bytes are carried over verbatim. The buffer does not know which bytes are
/// initialized - that is the owner's business.
#[derive(Debug)]
pub(crate) struct Buffer {
    /// Start of the allocation. Dangling (but aligned) while `capacity` is zero.
    ptr: NonNull<u8>,

    capacity: usize,

    /// Alignment of the base address. Always a power of two.
    align: usize,
}

impl Buffer {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            ptr: dangling(1),
            capacity: 0,
            align: 1,
        }
    }

    /// Base address of the buffer.
    ///
    /// Invalidated by any call that takes `&mut self`.
    #[must_use]
    #[inline]
    pub(crate) fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[must_use]
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    #[inline]
    pub(crate) fn align(&self) -> usize {
        self.align
    }

    /// Ensures the buffer can hold `required` bytes at a base address aligned to at least
    /// `align`, preserving the first `used` bytes.
    ///
    /// Growth is amortized (doubling) but the capacity never exceeds `limit` unless
    /// `required` itself does.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two, if `used` exceeds the current capacity or
    /// if `required` exceeds [`MAX_BUFFER_SIZE`].
    pub(crate) fn ensure(&mut self, required: usize, align: usize, used: usize, limit: usize) {
        assert!(align.is_power_of_two(), "alignment {align} is not a power of two");
        assert!(
            required <= MAX_BUFFER_SIZE,
            "buffer size {required} exceeds the maximum of {MAX_BUFFER_SIZE}"
        );

        let new_align = self.align.max(align);

        if required <= self.capacity && new_align == self.align {
            return;
        }

        let new_capacity = if required <= self.capacity {
            self.capacity
        } else {
            self.capacity
                .saturating_mul(2)
                .max(MIN_CAPACITY)
                .min(limit.min(MAX_BUFFER_SIZE))
                .max(required)
        };

        self.reallocate(new_capacity, new_align, used);
    }

    /// Releases excess capacity, keeping the first `used` bytes.
    pub(crate) fn shrink_to(&mut self, used: usize) {
        if used < self.capacity {
            self.reallocate(used, self.align, used);
        }
    }

    /// Releases the allocation. The base alignment is kept.
    pub(crate) fn release(&mut self) {
        if self.capacity == 0 {
            return;
        }

        // SAFETY: The pointer was allocated by us with exactly this layout and has not been
        // deallocated yet (capacity is reset right below).
        unsafe {
            dealloc(self.ptr.as_ptr(), self.current_layout());
        }

        log::trace!("released {} byte buffer", self.capacity);

        self.ptr = dangling(self.align);
        self.capacity = 0;
    }

    fn current_layout(&self) -> Layout {
        Layout::from_size_align(self.capacity, self.align)
            .expect("layout was valid when the buffer was allocated")
    }

    fn reallocate(&mut self, new_capacity: usize, new_align: usize, used: usize) {
        let (old_capacity, old_align) = (self.capacity, self.align);

        assert!(
            used <= self.capacity && used <= new_capacity,
            "cannot preserve {used} bytes when moving from {} to {new_capacity} bytes",
            self.capacity
        );

        if new_capacity == 0 {
            self.release();
            self.align = new_align;
            self.ptr = dangling(new_align);
            return;
        }

        let new_layout = Layout::from_size_align(new_capacity, new_align)
            .expect("buffer sizes are bounded well below isize::MAX");

        let new_ptr = if self.capacity > 0 && new_align == self.align {
            // SAFETY: The pointer was allocated by us with the current layout, the new size
            // is non-zero and forms a valid layout with the unchanged alignment.
            let new_ptr = unsafe { realloc(self.ptr.as_ptr(), self.current_layout(), new_capacity) };

            NonNull::new(new_ptr).expect(
                "we do not intend to handle allocation failure as a real possibility - OOM results in panic",
            )
        } else {
            // SAFETY: The layout has a non-zero size.
            let new_ptr = NonNull::new(unsafe { alloc(new_layout) }).expect(
                "we do not intend to handle allocation failure as a real possibility - OOM results in panic",
            );

            // SAFETY: Both blocks are valid for `used` bytes (asserted above) and are distinct
            // allocations, so they cannot overlap.
            unsafe {
                ptr::copy_nonoverlapping(self.ptr.as_ptr(), new_ptr.as_ptr(), used);
            }

            self.release();
            new_ptr
        };

        log::trace!(
            "moved buffer from {old_capacity} bytes aligned to {old_align} to {new_capacity} bytes aligned to {new_align}"
        );

        self.ptr = new_ptr;
        self.capacity = new_capacity;
        self.align = new_align;
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.release();
    }
}

/// A non-null pointer aligned to `align` that is valid for zero-sized accesses.
fn dangling(align: usize) -> NonNull<u8> {
    NonNull::new(ptr::without_provenance_mut::<u8>(align)).expect("alignment is never zero")
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use super::*;

    fn fill(buffer: &Buffer, len: usize) {
        for i in 0..len {
            unsafe {
                buffer.ptr().add(i).write(u8::try_from(i % 251).unwrap());
            }
        }
    }

    fn assert_filled(buffer: &Buffer, len: usize) {
        for i in 0..len {
            let value = unsafe { buffer.ptr().add(i).read() };
            assert_eq!(value, u8::try_from(i % 251).unwrap(), "byte {i} was not preserved");
        }
    }

    #[test]
    fn starts_empty() {
        let buffer = Buffer::new();

        assert_eq!(buffer.capacity(), 0);
        assert_eq!(buffer.align(), 1);
    }

    #[test]
    fn grows_to_minimum_capacity() {
        let mut buffer = Buffer::new();

        buffer.ensure(4, 4, 0, usize::MAX);

        assert_eq!(buffer.capacity(), MIN_CAPACITY);
        assert_eq!(buffer.align(), 4);
        assert_eq!(buffer.ptr().as_ptr().addr() % 4, 0);
    }

    #[test]
    fn growth_preserves_used_bytes() {
        let mut buffer = Buffer::new();

        buffer.ensure(100, 1, 0, usize::MAX);
        fill(&buffer, 100);

        buffer.ensure(1000, 1, 100, usize::MAX);

        assert!(buffer.capacity() >= 1000);
        assert_filled(&buffer, 100);
    }

    #[test]
    fn raising_alignment_preserves_used_bytes() {
        let mut buffer = Buffer::new();

        buffer.ensure(50, 1, 0, usize::MAX);
        fill(&buffer, 50);
        let capacity = buffer.capacity();

        buffer.ensure(50, 64, 50, usize::MAX);

        assert_eq!(buffer.align(), 64);
        assert_eq!(buffer.capacity(), capacity);
        assert_eq!(buffer.ptr().as_ptr().addr() % 64, 0);
        assert_filled(&buffer, 50);
    }

    #[test]
    fn alignment_never_decreases() {
        let mut buffer = Buffer::new();

        buffer.ensure(8, 16, 0, usize::MAX);
        buffer.ensure(500, 2, 0, usize::MAX);

        assert_eq!(buffer.align(), 16);
    }

    #[test]
    fn growth_respects_limit() {
        let mut buffer = Buffer::new();

        buffer.ensure(10, 1, 0, 20);
        assert_eq!(buffer.capacity(), 20);

        // The limit never prevents satisfying the actual requirement.
        buffer.ensure(30, 1, 0, 20);
        assert_eq!(buffer.capacity(), 30);
    }

    #[test]
    fn shrink_keeps_used_bytes() {
        let mut buffer = Buffer::new();

        buffer.ensure(1000, 8, 0, usize::MAX);
        fill(&buffer, 10);

        buffer.shrink_to(10);

        assert_eq!(buffer.capacity(), 10);
        assert_filled(&buffer, 10);
    }

    #[test]
    fn shrink_to_zero_releases() {
        let mut buffer = Buffer::new();

        buffer.ensure(100, 8, 0, usize::MAX);
        buffer.shrink_to(0);

        assert_eq!(buffer.capacity(), 0);
        assert_eq!(buffer.align(), 8);
        assert_eq!(buffer.ptr().as_ptr().addr() % 8, 0);
    }

    #[test]
    fn release_is_idempotent() {
        let mut buffer = Buffer::new();

        buffer.ensure(100, 1, 0, usize::MAX);
        buffer.release();
        buffer.release();

        assert_eq!(buffer.capacity(), 0);
    }

    #[test]
    #[should_panic]
    fn non_power_of_two_alignment_panics() {
        let mut buffer = Buffer::new();
        buffer.ensure(8, 3, 0, usize::MAX);
    }
}
