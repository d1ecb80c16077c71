use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;

use crate::buffer::MAX_BUFFER_SIZE;
use crate::{DropPolicy, Granularity, Offset, PolyVec};

/// Builder for creating an instance of [`PolyVec`].
///
/// Every setting is optional. The capability set `B` and the offset type `O` are chosen
/// through the type of the container the builder was obtained from.
///
/// # Examples
///
/// Using the defaults:
///
/// ```
/// use std::fmt::Debug;
///
/// use poly_vec::PolyVec;
///
/// let vec = PolyVec::<dyn Debug>::builder().build();
/// assert!(vec.is_empty());
/// ```
///
/// Word-granular addressing with 16-bit offsets:
///
/// ```
/// use std::fmt::Debug;
///
/// use poly_vec::{Granularity, PolyVec};
///
/// let vec = PolyVec::<dyn Debug, u16>::builder()
///     .granularity(Granularity::Word)
///     .build();
///
/// // 65535 words can be addressed.
/// assert_eq!(vec.max_buffer_size(), 65_535 * size_of::<usize>());
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred between threads,
/// allowing container configuration to happen on different threads than where the
/// container is used. However, it is not thread-safe ([`Sync`]) as it contains mutable
/// configuration state.
#[must_use]
pub struct PolyVecBuilder<B: ?Sized, O: Offset = usize> {
    granularity: Granularity,
    max_buffer_size: Option<usize>,
    drop_policy: DropPolicy,
    buffer_capacity: usize,
    slot_capacity: usize,

    _types: PhantomData<fn() -> (O, *const B)>,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl<B: ?Sized, O: Offset> PolyVecBuilder<B, O> {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            granularity: Granularity::default(),
            max_buffer_size: None,
            drop_policy: DropPolicy::default(),
            buffer_capacity: 0,
            slot_capacity: 0,
            _types: PhantomData,
            _not_sync: PhantomData,
        }
    }

    /// Sets the addressing [granularity][Granularity] of the slot table.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::fmt::Debug;
    ///
    /// use poly_vec::{Granularity, PolyVec};
    ///
    /// let vec = PolyVec::<dyn Debug>::builder()
    ///     .granularity(Granularity::Word)
    ///     .build();
    ///
    /// assert_eq!(vec.granularity(), Granularity::Word);
    /// ```
    #[inline]
    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Sets a ceiling on the size of the backing buffer, in bytes.
    ///
    /// An append whose end offset would exceed the ceiling fails with
    /// [`Error::CapacityExceeded`][crate::Error::CapacityExceeded]. The ceiling is rounded
    /// down to a whole number of addressing units.
    ///
    /// If not set, the ceiling is the largest buffer the offset type can address.
    ///
    /// # Panics
    ///
    /// [`build()`](Self::build) panics if the ceiling cannot be represented by the offset
    /// type at the configured granularity.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::fmt::Debug;
    ///
    /// use poly_vec::PolyVec;
    ///
    /// let vec = PolyVec::<dyn Debug, u32>::builder()
    ///     .max_buffer_size(1024)
    ///     .build();
    ///
    /// assert_eq!(vec.max_buffer_size(), 1024);
    /// ```
    #[inline]
    pub fn max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = Some(max_buffer_size);
        self
    }

    /// Sets the [drop policy][DropPolicy] for the container. This governs how
    /// to treat remaining occupants when the container is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::fmt::Debug;
    ///
    /// use poly_vec::{DropPolicy, PolyVec};
    ///
    /// let vec = PolyVec::<dyn Debug>::builder()
    ///     .drop_policy(DropPolicy::MustNotDropItems)
    ///     .build();
    ///
    /// assert_eq!(vec.drop_policy(), DropPolicy::MustNotDropItems);
    /// ```
    #[inline]
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Preallocates room for `bytes` bytes of occupant storage.
    #[inline]
    pub fn buffer_capacity(mut self, bytes: usize) -> Self {
        self.buffer_capacity = bytes;
        self
    }

    /// Preallocates room for `slots` slots in the slot table and the free list.
    #[inline]
    pub fn slot_capacity(mut self, slots: usize) -> Self {
        self.slot_capacity = slots;
        self
    }

    /// Builds the container with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configured maximum buffer size cannot be addressed by the offset type
    /// at the configured granularity.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::fmt::Debug;
    ///
    /// use poly_vec::PolyVec;
    ///
    /// let vec = PolyVec::<dyn Debug, u8>::builder().build();
    /// assert_eq!(vec.max_buffer_size(), 255);
    /// ```
    #[must_use]
    pub fn build(self) -> PolyVec<B, O> {
        let unit = self.granularity.unit();
        let addressable = O::max_usize()
            .saturating_mul(unit)
            .min(MAX_BUFFER_SIZE);

        let max_buffer_size = match self.max_buffer_size {
            Some(requested) => {
                assert!(
                    requested <= addressable,
                    "maximum buffer size {requested} cannot be addressed with {:?} offsets at {:?} granularity (limit {addressable})",
                    O::WIDTH,
                    self.granularity
                );

                requested
            }
            None => addressable,
        };

        // Round down to whole units so every accepted end offset is a unit multiple.
        let max_buffer_size = max_buffer_size
            .checked_div(unit)
            .expect("unit is never zero")
            .wrapping_mul(unit);

        PolyVec::new_inner(
            self.granularity,
            max_buffer_size,
            self.drop_policy,
            self.buffer_capacity.min(max_buffer_size),
            self.slot_capacity,
        )
    }
}

impl<B: ?Sized, O: Offset> fmt::Debug for PolyVecBuilder<B, O> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolyVecBuilder")
            .field("offset_width", &O::WIDTH)
            .field("granularity", &self.granularity)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("drop_policy", &self.drop_policy)
            .field("buffer_capacity", &self.buffer_capacity)
            .field("slot_capacity", &self.slot_capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    // Test trait implementations.
    assert_impl_all!(PolyVecBuilder<dyn Debug>: Send, Debug);
    assert_not_impl_any!(PolyVecBuilder<dyn Debug>: Sync);

    #[test]
    fn builder_new_creates_default_state() {
        let builder = PolyVecBuilder::<dyn Debug>::new();

        assert_eq!(builder.granularity, Granularity::Byte);
        assert!(builder.max_buffer_size.is_none());
        assert_eq!(builder.drop_policy, DropPolicy::default());
        assert_eq!(builder.buffer_capacity, 0);
        assert_eq!(builder.slot_capacity, 0);
    }

    #[test]
    fn default_limit_is_offset_width() {
        let vec = PolyVecBuilder::<dyn Debug, u16>::new().build();
        assert_eq!(vec.max_buffer_size(), 65_535);
    }

    #[test]
    fn word_granularity_scales_default_limit() {
        let vec = PolyVecBuilder::<dyn Debug, u8>::new()
            .granularity(Granularity::Word)
            .build();

        assert_eq!(vec.max_buffer_size(), 255 * size_of::<usize>());
    }

    #[test]
    fn usize_limit_is_clamped() {
        let vec = PolyVecBuilder::<dyn Debug>::new().build();
        assert_eq!(vec.max_buffer_size(), MAX_BUFFER_SIZE);
    }

    #[test]
    fn explicit_limit_is_rounded_down_to_units() {
        let word = size_of::<usize>();

        let vec = PolyVecBuilder::<dyn Debug, u32>::new()
            .granularity(Granularity::Word)
            .max_buffer_size(word * 10 + 3)
            .build();

        assert_eq!(vec.max_buffer_size(), word * 10);
    }

    #[test]
    #[should_panic]
    fn unaddressable_limit_panics() {
        let _vec = PolyVecBuilder::<dyn Debug, u8>::new()
            .max_buffer_size(256)
            .build();
    }

    #[test]
    fn capacities_are_preallocated() {
        let vec = PolyVecBuilder::<dyn Debug>::new()
            .buffer_capacity(512)
            .slot_capacity(32)
            .build();

        assert!(vec.buffer_capacity() >= 512);
        assert!(vec.slot_capacity() >= 32);
        assert_eq!(vec.len(), 0);
    }

    #[test]
    fn buffer_capacity_is_clamped_to_limit() {
        let vec = PolyVecBuilder::<dyn Debug, u8>::new()
            .buffer_capacity(10_000)
            .build();

        assert!(vec.buffer_capacity() <= 255);
    }

    #[test]
    fn builder_chaining_works() {
        let builder = PolyVecBuilder::<dyn Debug, u32>::new()
            .granularity(Granularity::Word)
            .drop_policy(DropPolicy::MustNotDropItems)
            .max_buffer_size(4096);

        assert_eq!(builder.granularity, Granularity::Word);
        assert_eq!(builder.drop_policy, DropPolicy::MustNotDropItems);
        assert_eq!(builder.max_buffer_size, Some(4096));
    }

    #[test]
    fn settings_can_be_overridden() {
        let builder = PolyVecBuilder::<dyn Debug>::new()
            .drop_policy(DropPolicy::MustNotDropItems)
            .drop_policy(DropPolicy::MayDropItems)
            .granularity(Granularity::Word)
            .granularity(Granularity::Byte);

        assert_eq!(builder.drop_policy, DropPolicy::MayDropItems);
        assert_eq!(builder.granularity, Granularity::Byte);
    }

    #[test]
    fn builder_is_debug() {
        let builder = PolyVecBuilder::<dyn Debug>::new();
        let debug_output = format!("{builder:?}");
        assert!(debug_output.contains("PolyVecBuilder"));
    }

    #[test]
    fn builder_send_trait() {
        // Verify builder can be moved between threads.
        let builder = PolyVecBuilder::<u64>::new().slot_capacity(4);
        let handle = std::thread::spawn(move || builder.build().len());
        assert_eq!(handle.join().expect("thread completed successfully"), 0);
    }
}
