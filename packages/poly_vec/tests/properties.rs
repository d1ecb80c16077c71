//! Property tests that drive `PolyVec` with random operation sequences and compare it
//! against a simple model of which slots hold which values.

use poly_vec::{Error, PolyVec, occupant};
use proptest::prelude::*;
use proptest::sample::Index;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Tiny,
    Word,
    Triple,
    Aligned,
}

trait Tagged {
    fn tag(&self) -> (Kind, u8);
}

struct Tiny(u8);
struct Word(u64);
struct Triple([u32; 3]);

#[repr(align(16))]
struct Aligned(u8);

impl Tagged for Tiny {
    fn tag(&self) -> (Kind, u8) {
        (Kind::Tiny, self.0)
    }
}

impl Tagged for Word {
    fn tag(&self) -> (Kind, u8) {
        (Kind::Word, u8::try_from(self.0).unwrap())
    }
}

impl Tagged for Triple {
    fn tag(&self) -> (Kind, u8) {
        let [first, value, last] = self.0;
        assert_eq!(first, last);
        (Kind::Triple, u8::try_from(value).unwrap())
    }
}

impl Tagged for Aligned {
    fn tag(&self) -> (Kind, u8) {
        (Kind::Aligned, self.0)
    }
}

occupant!(dyn Tagged: Tiny, Word, Triple, Aligned);

impl Kind {
    fn layout(self) -> (usize, usize) {
        match self {
            Self::Tiny => (size_of::<Tiny>(), align_of::<Tiny>()),
            Self::Word => (size_of::<Word>(), align_of::<Word>()),
            Self::Triple => (size_of::<Triple>(), align_of::<Triple>()),
            Self::Aligned => (size_of::<Aligned>(), align_of::<Aligned>()),
        }
    }
}

#[derive(Clone, Debug)]
enum Op {
    PushBack(Kind, u8),
    Push(Kind, u8),
    Free(Index),
    FreeAll,
}

const LIMIT: usize = 512;

fn kind() -> impl Strategy<Value = Kind> {
    prop_oneof![
        Just(Kind::Tiny),
        Just(Kind::Word),
        Just(Kind::Triple),
        Just(Kind::Aligned),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (kind(), any::<u8>()).prop_map(|(kind, value)| Op::PushBack(kind, value)),
        4 => (kind(), any::<u8>()).prop_map(|(kind, value)| Op::Push(kind, value)),
        4 => any::<Index>().prop_map(Op::Free),
        1 => Just(Op::FreeAll),
    ]
}

fn insert(
    vec: &mut PolyVec<dyn Tagged, u16>,
    kind: Kind,
    value: u8,
    reuse: bool,
) -> Result<usize, Error> {
    match (kind, reuse) {
        (Kind::Tiny, false) => vec.push_back(Tiny(value)),
        (Kind::Tiny, true) => vec.push(Tiny(value)),
        (Kind::Word, false) => vec.push_back(Word(u64::from(value))),
        (Kind::Word, true) => vec.emplace(|| Word(u64::from(value))),
        (Kind::Triple, false) => vec.emplace_back(|| {
            Triple([u32::from(value), u32::from(value), u32::from(value)])
        }),
        (Kind::Triple, true) => {
            vec.push(Triple([u32::from(value), u32::from(value), u32::from(value)]))
        }
        (Kind::Aligned, false) => vec.push_back(Aligned(value)),
        (Kind::Aligned, true) => vec.push(Aligned(value)),
    }
}

fn has_fitting_free_slot(
    vec: &PolyVec<dyn Tagged, u16>,
    model: &[Option<(Kind, u8)>],
    kind: Kind,
) -> bool {
    let (size, align) = kind.layout();

    model.iter().enumerate().any(|(index, slot)| {
        slot.is_none()
            && vec.offset_at(index).unwrap() % align == 0
            && vec.size_at(index).unwrap() >= size
    })
}

fn check(vec: &PolyVec<dyn Tagged, u16>, model: &[Option<(Kind, u8)>]) {
    assert_eq!(vec.len(), model.len());
    assert_eq!(vec.live_len(), model.iter().flatten().count());
    assert_eq!(vec.is_empty(), model.iter().all(Option::is_none));
    assert!(vec.bump_offset() <= LIMIT);

    let mut previous_end = 0;

    for (index, expected) in model.iter().enumerate() {
        let offset = vec.offset_at(index).unwrap();
        let size = vec.size_at(index).unwrap();

        // Slots are laid out in index order and never overlap.
        assert!(offset >= previous_end);
        previous_end = offset + size;

        assert_eq!(vec.is_free(index).unwrap(), expected.is_none());

        match expected {
            Some((kind, value)) => {
                let (min_size, align) = kind.layout();
                assert_eq!(offset % align, 0);
                assert!(size >= min_size);
                assert_eq!(vec[index].tag(), (*kind, *value));
            }
            None => assert!(vec.at(index).unwrap().is_none()),
        }
    }

    assert!(previous_end <= vec.bump_offset());

    let iterated: Vec<(Kind, u8)> = vec.iter().map(Tagged::tag).collect();
    let expected: Vec<(Kind, u8)> = model.iter().flatten().copied().collect();
    assert_eq!(iterated, expected);

    let indices: Vec<usize> = vec.indices().collect();
    let expected_indices: Vec<usize> = model
        .iter()
        .enumerate()
        .filter_map(|(index, slot)| slot.map(|_| index))
        .collect();
    assert_eq!(indices, expected_indices);
}

proptest! {
    #[test]
    fn behaves_like_slot_model(ops in proptest::collection::vec(op(), 1..120)) {
        let mut vec = PolyVec::<dyn Tagged, u16>::builder()
            .max_buffer_size(LIMIT)
            .build();
        let mut model: Vec<Option<(Kind, u8)>> = Vec::new();

        for op in ops {
            match op {
                Op::PushBack(kind, value) => {
                    let bump = vec.bump_offset();

                    match insert(&mut vec, kind, value, false) {
                        Ok(index) => {
                            prop_assert_eq!(index, model.len());
                            prop_assert!(vec.offset_at(index).unwrap() >= bump);
                            model.push(Some((kind, value)));
                        }
                        Err(error) => {
                            let is_capacity_error =
                                matches!(error, Error::CapacityExceeded { .. });
                            prop_assert!(is_capacity_error);
                        }
                    }
                }
                Op::Push(kind, value) => {
                    let fits = has_fitting_free_slot(&vec, &model, kind);
                    let bump = vec.bump_offset();

                    match insert(&mut vec, kind, value, true) {
                        Ok(index) if fits => {
                            let slot = model.get_mut(index).unwrap();
                            prop_assert!(slot.is_none());
                            *slot = Some((kind, value));
                            prop_assert_eq!(vec.bump_offset(), bump);
                        }
                        Ok(index) => {
                            prop_assert_eq!(index, model.len());
                            model.push(Some((kind, value)));
                        }
                        Err(error) => {
                            prop_assert!(!fits);
                            let is_capacity_error =
                                matches!(error, Error::CapacityExceeded { .. });
                            prop_assert!(is_capacity_error);
                        }
                    }
                }
                Op::Free(index) => {
                    if model.is_empty() {
                        prop_assert!(vec.free(0).is_err());
                        continue;
                    }

                    let index = index.index(model.len());
                    let slot = model.get_mut(index).unwrap();

                    if slot.is_some() {
                        prop_assert_eq!(vec.free(index), Ok(()));
                        *slot = None;
                    } else {
                        prop_assert_eq!(
                            vec.free(index),
                            Err(Error::SlotVacant { operation: "free", index })
                        );
                    }
                }
                Op::FreeAll => {
                    vec.free_all();
                    model.clear();
                }
            }

            check(&vec, &model);
        }
    }

    #[test]
    fn reserve_and_shrink_do_not_disturb_contents(
        values in proptest::collection::vec(any::<u8>(), 1..40),
        extra in 0_usize..2048,
    ) {
        let mut vec = PolyVec::<dyn Tagged>::new();
        let mut expected = Vec::new();

        for (i, value) in values.iter().enumerate() {
            let kind = if i % 2 == 0 { Kind::Aligned } else { Kind::Tiny };

            match kind {
                Kind::Aligned => vec.push_back(Aligned(*value)).unwrap(),
                _ => vec.push_back(Tiny(*value)).unwrap(),
            };

            expected.push((kind, *value));
        }

        vec.reserve(extra, 8);
        prop_assert!(vec.buffer_capacity() >= vec.bump_offset() + extra);

        vec.shrink_to_fit();
        prop_assert_eq!(vec.buffer_capacity(), vec.bump_offset());

        let actual: Vec<(Kind, u8)> = vec.iter().map(Tagged::tag).collect();
        prop_assert_eq!(actual, expected);
    }
}
