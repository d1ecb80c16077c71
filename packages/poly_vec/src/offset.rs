use std::fmt::Debug;

use crate::Granularity;

/// Width of the unsigned integer a [`PolyVec`][crate::PolyVec] uses for its slot table
/// and free list.
///
/// A narrower width shrinks the per-slot bookkeeping but puts a ceiling on the size of the
/// backing buffer (and on the number of slots).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum OffsetWidth {
    /// 8-bit offsets.
    U8,
    /// 16-bit offsets.
    U16,
    /// 32-bit offsets.
    U32,
    /// 64-bit offsets.
    U64,
}

impl OffsetWidth {
    const fn from_bytes(bytes: usize) -> Self {
        match bytes {
            1 => Self::U8,
            2 => Self::U16,
            4 => Self::U32,
            _ => Self::U64,
        }
    }

    /// The largest number of addressing units representable at this width.
    #[must_use]
    #[inline]
    #[allow(clippy::cast_lossless, reason = "From conversions are not const")]
    pub const fn max_units(self) -> u64 {
        match self {
            Self::U8 => u8::MAX as u64,
            Self::U16 => u16::MAX as u64,
            Self::U32 => u32::MAX as u64,
            Self::U64 => u64::MAX,
        }
    }

    /// Selects the narrowest width that can address a buffer of `max_buffer_size` bytes
    /// with the given addressing granularity.
    ///
    /// # Examples
    ///
    /// ```
    /// use poly_vec::{Granularity, OffsetWidth};
    ///
    /// assert_eq!(
    ///     OffsetWidth::narrowest_for(200, Granularity::Byte),
    ///     OffsetWidth::U8
    /// );
    /// assert_eq!(
    ///     OffsetWidth::narrowest_for(4096, Granularity::Byte),
    ///     OffsetWidth::U16
    /// );
    /// ```
    #[must_use]
    pub fn narrowest_for(max_buffer_size: usize, granularity: Granularity) -> Self {
        let units = max_buffer_size.div_ceil(granularity.unit());
        let units = u64::try_from(units).unwrap_or(u64::MAX);

        [Self::U8, Self::U16, Self::U32]
            .into_iter()
            .find(|width| units <= width.max_units())
            .unwrap_or(Self::U64)
    }
}

trait Sealed {}

/// An unsigned integer type usable for slot offsets and free-list indices.
///
/// Implemented for `u8`, `u16`, `u32`, `u64` and `usize`. This trait is sealed.
#[expect(private_bounds, reason = "intentional - sealed trait")]
pub trait Offset: Copy + Debug + Ord + Send + Sync + Sealed + 'static {
    /// The width of this integer type.
    const WIDTH: OffsetWidth;

    /// The zero value, used for the initial bump offset.
    const ZERO: Self;

    /// Converts from `usize`, returning `None` if the value is not representable.
    fn from_usize(value: usize) -> Option<Self>;

    /// Converts to `usize`.
    ///
    /// Values stored in a container always originate from `usize` so this is lossless.
    fn to_usize(self) -> usize;

    /// The largest value of this type that is also representable as `usize`.
    fn max_usize() -> usize;
}

macro_rules! impl_offset {
    ($($ty:ty),+) => {
        $(
            impl Sealed for $ty {}

            impl Offset for $ty {
                const WIDTH: OffsetWidth = OffsetWidth::from_bytes(size_of::<$ty>());
                const ZERO: Self = 0;

                #[inline]
                fn from_usize(value: usize) -> Option<Self> {
                    Self::try_from(value).ok()
                }

                #[inline]
                fn to_usize(self) -> usize {
                    usize::try_from(self).expect("offsets are only ever created from usize values")
                }

                #[inline]
                fn max_usize() -> usize {
                    usize::try_from(Self::MAX).unwrap_or(usize::MAX)
                }
            }
        )+
    };
}

impl_offset!(u8, u16, u32, u64, usize);
