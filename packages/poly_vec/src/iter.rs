use std::fmt;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::{Dispatch, Offset, PolyVec};

/// Iterator over the live occupants of a [`PolyVec`], in slot order.
///
/// Free slots are skipped. Created by [`PolyVec::iter()`].
///
/// # Example
///
/// ```
/// use poly_vec::PolyVec;
///
/// let mut vec = PolyVec::<u32>::new();
/// vec.push(1).unwrap();
/// let second = vec.push(2).unwrap();
/// vec.push(3).unwrap();
///
/// vec.free(second).unwrap();
///
/// let values: Vec<u32> = vec.iter().copied().collect();
/// assert_eq!(values, [1, 3]);
/// ```
pub struct Iter<'a, B: ?Sized, O: Offset = usize> {
    vec: &'a PolyVec<B, O>,
    index: usize,
    end: usize,
}

impl<'a, B: ?Sized, O: Offset> Iter<'a, B, O> {
    #[inline]
    pub(crate) fn new(vec: &'a PolyVec<B, O>) -> Self {
        Self {
            vec,
            index: 0,
            end: vec.len(),
        }
    }
}

impl<'a, B: ?Sized, O: Offset> Iterator for Iter<'a, B, O> {
    type Item = &'a B;

    fn next(&mut self) -> Option<Self::Item> {
        let vec = self.vec;

        while self.index < self.end {
            let index = self.index;
            self.index = index.wrapping_add(1);

            if let Some(occupant) = vec.get(index) {
                return Some(occupant);
            }
        }

        None
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.end.saturating_sub(self.index)))
    }
}

impl<B: ?Sized, O: Offset> FusedIterator for Iter<'_, B, O> {}

impl<B: ?Sized, O: Offset> Clone for Iter<'_, B, O> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            vec: self.vec,
            index: self.index,
            end: self.end,
        }
    }
}

impl<B: ?Sized, O: Offset> fmt::Debug for Iter<'_, B, O> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter")
            .field("index", &self.index)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

/// Mutable iterator over the live occupants of a [`PolyVec`], in slot order.
///
/// Free slots are skipped. Created by [`PolyVec::iter_mut()`].
pub struct IterMut<'a, B: ?Sized, O: Offset = usize> {
    base: NonNull<u8>,
    unit: usize,
    offsets: &'a [O],
    dispatch: &'a [Option<Dispatch<B>>],
    index: usize,

    // We hand out exclusive references to occupants for 'a.
    _occupants: PhantomData<&'a mut B>,
}

impl<'a, B: ?Sized, O: Offset> IterMut<'a, B, O> {
    /// The caller must hold an exclusive borrow of the container for `'a`, from which all
    /// the arguments are derived.
    #[inline]
    pub(crate) fn new(
        base: NonNull<u8>,
        unit: usize,
        offsets: &'a [O],
        dispatch: &'a [Option<Dispatch<B>>],
    ) -> Self {
        Self {
            base,
            unit,
            offsets,
            dispatch,
            index: 0,
            _occupants: PhantomData,
        }
    }
}

impl<'a, B: ?Sized, O: Offset> Iterator for IterMut<'a, B, O> {
    type Item = &'a mut B;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(slot) = self.dispatch.get(self.index) {
            let index = self.index;
            self.index = index.wrapping_add(1);

            let Some(dispatch) = *slot else {
                continue;
            };

            let start = self
                .offsets
                .get(index)
                .expect("slot table has an entry for every slot")
                .to_usize()
                .wrapping_mul(self.unit);

            // SAFETY: Live slots lie within the buffer.
            let object = unsafe { self.base.add(start) };
            let mut object = dispatch.upcast(object);

            // SAFETY: The slot is live. Every slot is visited at most once and slots never
            // overlap, so the references we hand out are disjoint. The container is
            // exclusively borrowed for 'a, so nothing else can touch the occupants.
            return Some(unsafe { object.as_mut() });
        }

        None
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.dispatch.len().saturating_sub(self.index)))
    }
}

impl<B: ?Sized, O: Offset> FusedIterator for IterMut<'_, B, O> {}

impl<B: ?Sized, O: Offset> fmt::Debug for IterMut<'_, B, O> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterMut")
            .field("index", &self.index)
            .field("end", &self.dispatch.len())
            .finish_non_exhaustive()
    }
}

/// Iterator over the indices of the live slots of a [`PolyVec`], in ascending order.
///
/// Created by [`PolyVec::indices()`]. Two cursors compare equal when they are at the same
/// position, regardless of what the slots contain.
///
/// # Example
///
/// ```
/// use poly_vec::PolyVec;
///
/// let mut vec = PolyVec::<&str>::new();
/// vec.push("a").unwrap();
/// let b = vec.push("b").unwrap();
/// vec.push("c").unwrap();
///
/// vec.free(b).unwrap();
///
/// assert_eq!(vec.indices().collect::<Vec<_>>(), [0, 2]);
/// ```
pub struct Indices<'a, B: ?Sized> {
    dispatch: &'a [Option<Dispatch<B>>],
    index: usize,
}

impl<'a, B: ?Sized> Indices<'a, B> {
    #[inline]
    pub(crate) fn new(dispatch: &'a [Option<Dispatch<B>>]) -> Self {
        Self { dispatch, index: 0 }
    }
}

impl<B: ?Sized> Iterator for Indices<'_, B> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(slot) = self.dispatch.get(self.index) {
            let index = self.index;
            self.index = index.wrapping_add(1);

            if slot.is_some() {
                return Some(index);
            }
        }

        None
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.dispatch.len().saturating_sub(self.index)))
    }
}

impl<B: ?Sized> FusedIterator for Indices<'_, B> {}

impl<B: ?Sized> Clone for Indices<'_, B> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            dispatch: self.dispatch,
            index: self.index,
        }
    }
}

impl<B: ?Sized> PartialEq for Indices<'_, B> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.dispatch.len() == other.dispatch.len()
    }
}

impl<B: ?Sized> Eq for Indices<'_, B> {}

impl<B: ?Sized> fmt::Debug for Indices<'_, B> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Indices")
            .field("index", &self.index)
            .field("end", &self.dispatch.len())
            .finish()
    }
}
