/// The addressing unit used for offsets in the slot table.
///
/// With [`Granularity::Word`], offsets count machine words instead of bytes. Every slot
/// then starts on a word boundary and occupies a whole number of words, which lets a
/// narrow [`Offset`][crate::Offset] type address a buffer `size_of::<usize>()` times larger
/// at the cost of padding small occupants up to a full word.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Granularity {
    /// Offsets are counted in bytes. This is the default.
    #[default]
    Byte,

    /// Offsets are counted in machine words (`size_of::<usize>()` bytes).
    Word,
}

impl Granularity {
    /// The number of bytes in one addressing unit.
    #[must_use]
    #[inline]
    pub const fn unit(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Word => size_of::<usize>(),
        }
    }

    /// Rounds a byte count up to a whole number of addressing units.
    ///
    /// Returns `None` on overflow.
    #[must_use]
    #[inline]
    pub(crate) const fn round_up(self, bytes: usize) -> Option<usize> {
        // Units are powers of two, so masking is exact.
        let mask = self.unit().wrapping_sub(1);

        match bytes.checked_add(mask) {
            Some(padded) => Some(padded & !mask),
            None => None,
        }
    }
}
