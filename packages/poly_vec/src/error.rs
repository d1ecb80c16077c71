use thiserror::Error;

/// Errors that can occur when operating on a [`PolyVec`][crate::PolyVec].
///
/// Every fallible operation fails atomically: when an error is returned, the container
/// has not been modified.
#[derive(Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// A checked operation was given a slot index that does not exist.
    #[error("poly_vec::{operation}(): index {index} not less than size {size}")]
    IndexOutOfRange {
        /// Name of the operation that rejected the index.
        operation: &'static str,

        /// The offending slot index.
        index: usize,

        /// The number of slots in the container when the operation was attempted.
        size: usize,
    },

    /// The operation requires a live occupant but the slot has been freed.
    #[error("poly_vec::{operation}(): slot {index} is free")]
    SlotVacant {
        /// Name of the operation that rejected the index.
        operation: &'static str,

        /// The index of the free slot.
        index: usize,
    },

    /// An append would extend the backing buffer (or the slot table) past what the
    /// configured offset width and maximum buffer size can represent.
    #[error("capacity exceeded: requested {requested} but the limit is {limit}")]
    CapacityExceeded {
        /// The end offset (in bytes) or slot count that could not be represented.
        requested: usize,

        /// The largest end offset (in bytes) or slot count that can be represented.
        limit: usize,
    },
}

/// A specialized `Result` type for `PolyVec` operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
