//! Integration tests for the `poly_vec` package.
//!
//! These tests exercise `PolyVec` through its public API only, storing trait objects of
//! several concrete types side by side.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use poly_vec::{Dispatch, Error, Granularity, PolyVec, occupant};

type Log = Rc<RefCell<Vec<String>>>;

trait Greeter {
    fn hi(&mut self) -> String;
}

struct Quiet {
    log: Log,
}

struct Counter {
    member: i32,
    log: Log,
}

impl Greeter for Quiet {
    fn hi(&mut self) -> String {
        "Nah".to_string()
    }
}

impl Greeter for Counter {
    fn hi(&mut self) -> String {
        self.member += 1;
        format!("Grolsch{}", self.member)
    }
}

impl Drop for Quiet {
    fn drop(&mut self) {
        self.log.borrow_mut().push("destroyed Quiet".to_string());
    }
}

impl Drop for Counter {
    fn drop(&mut self) {
        self.member += 1;
        self.log
            .borrow_mut()
            .push(format!("destroyed Counter{}", self.member));
    }
}

occupant!(dyn Greeter: Quiet, Counter);

fn quiet(log: &Log) -> Quiet {
    Quiet {
        log: Rc::clone(log),
    }
}

fn counter(member: i32, log: &Log) -> Counter {
    Counter {
        member,
        log: Rc::clone(log),
    }
}

#[test]
fn mixed_insertions_iterate_in_slot_order() {
    let log = Log::default();
    let mut vec = PolyVec::<dyn Greeter>::new();

    vec.emplace(|| quiet(&log)).unwrap();
    vec.emplace(|| counter(36789, &log)).unwrap();
    vec.emplace_back(|| quiet(&log)).unwrap();
    vec.push(quiet(&log)).unwrap();
    vec.push_back(counter(2, &log)).unwrap();

    let greetings: Vec<String> = vec.iter_mut().map(|greeter| greeter.hi()).collect();
    assert_eq!(greetings, ["Nah", "Grolsch36790", "Nah", "Nah", "Grolsch3"]);

    // Nothing has been dropped yet; moved-from values do not run destructors.
    assert!(log.borrow().is_empty());

    vec.free_all();

    assert_eq!(
        *log.borrow(),
        [
            "destroyed Quiet",
            "destroyed Counter36791",
            "destroyed Quiet",
            "destroyed Quiet",
            "destroyed Counter4",
        ]
    );
    assert_eq!(vec.len(), 0);
}

#[test]
fn iteration_skips_freed_slot() {
    let log = Log::default();
    let mut vec = PolyVec::<dyn Greeter>::new();

    vec.push_back(counter(0, &log)).unwrap();
    vec.push_back(quiet(&log)).unwrap();
    vec.push_back(counter(10, &log)).unwrap();

    vec.free(1).unwrap();
    assert_eq!(*log.borrow(), ["destroyed Quiet"]);

    let greetings: Vec<String> = (&mut vec).into_iter().map(|greeter| greeter.hi()).collect();
    assert_eq!(greetings, ["Grolsch1", "Grolsch11"]);
    assert_eq!(vec.indices().collect::<Vec<_>>(), [0, 2]);
}

#[test]
fn teardown_drops_every_live_occupant_exactly_once() {
    let log = Log::default();

    {
        let mut vec = PolyVec::<dyn Greeter>::new();

        for member in 0..5 {
            vec.push(counter(member, &log)).unwrap();
        }

        vec.free(0).unwrap();
        vec.free(3).unwrap();
        vec.push(quiet(&log)).unwrap();
    }

    let log = log.borrow();
    assert_eq!(log.len(), 6);
    assert_eq!(
        log.iter().filter(|entry| *entry == "destroyed Quiet").count(),
        1
    );
}

#[test]
fn clear_then_reuse_from_scratch() {
    let log = Log::default();
    let mut vec = PolyVec::<dyn Greeter>::new();

    vec.push(counter(1, &log)).unwrap();
    vec.push(quiet(&log)).unwrap();

    vec.clear();

    assert_eq!(log.borrow().len(), 2);
    assert!(vec.is_empty());
    assert_eq!(vec.buffer_capacity(), 0);

    let index = vec.push(quiet(&log)).unwrap();
    assert_eq!(index, 0);
    assert_eq!(vec.offset_at(index), Ok(0));
}

#[test]
fn reused_slot_keeps_its_position() {
    let log = Log::default();
    let mut vec = PolyVec::<dyn Greeter>::new();

    vec.push(counter(1, &log)).unwrap();
    vec.push(counter(2, &log)).unwrap();
    vec.push(counter(3, &log)).unwrap();

    let offset = vec.offset_at(1).unwrap();
    let size = vec.size_at(1).unwrap();
    let bump = vec.bump_offset();

    vec.free(1).unwrap();
    let index = vec.push(quiet(&log)).unwrap();

    assert_eq!(index, 1);
    assert_eq!(vec.offset_at(1), Ok(offset));
    assert_eq!(vec.size_at(1), Ok(size));
    assert_eq!(vec.bump_offset(), bump);
    assert_eq!(vec[1].hi(), "Nah");
}

#[test]
fn errors_identify_operation() {
    let mut vec = PolyVec::<dyn Greeter>::new();

    assert_eq!(
        vec.size_at(0),
        Err(Error::IndexOutOfRange {
            operation: "size_at",
            index: 0,
            size: 0
        })
    );

    assert_eq!(
        vec.free(7).unwrap_err().to_string(),
        "poly_vec::free(): index 7 not less than size 0"
    );
}

#[test]
fn narrow_word_granular_offsets_address_more_memory() {
    let word = size_of::<usize>();

    let mut byte_addressed = PolyVec::<[u64; 8], u8>::new();
    let mut word_addressed = PolyVec::<[u64; 8], u8>::builder()
        .granularity(Granularity::Word)
        .build();

    let mut byte_count = 0;
    while byte_addressed.push_back([0; 8]).is_ok() {
        byte_count += 1;
    }

    let mut word_count = 0;
    while word_addressed.push_back([0; 8]).is_ok() {
        word_count += 1;
    }

    assert_eq!(byte_count, 255 / 64);
    assert_eq!(word_count, 255 * word / 64);
    assert!(word_addressed.max_buffer_size() > byte_addressed.max_buffer_size());
}

#[test]
fn memplace_moves_occupant_between_containers() {
    #[derive(Debug, PartialEq)]
    struct Payload {
        name: String,
        values: Vec<u32>,
    }

    occupant!(dyn Debug: Payload);

    let mut source = PolyVec::<dyn Debug>::new();
    let mut target = PolyVec::<dyn Debug>::new();

    let original = Payload {
        name: "payload".to_string(),
        values: vec![1, 2, 3],
    };
    let expected = format!("{original:?}");

    let index = source.push(original).unwrap();

    // Copy the byte image over, then forget the source slot without dropping it.
    let offset = source.offset_at(index).unwrap();
    let size = source.size_at(index).unwrap();

    // SAFETY: Slot offsets lie within the buffer.
    let start = unsafe { source.as_ptr().add(offset) };

    // SAFETY: The slot is live and spans `size` initialized bytes from `start`.
    let bytes = unsafe { std::slice::from_raw_parts(start, size) };

    // SAFETY: The bytes are a valid `Payload`, and the source is leaked below so the value
    // is owned by the target alone.
    let moved = unsafe {
        target.memplace_back(bytes, align_of::<Payload>(), Dispatch::of::<Payload>())
    }
    .unwrap();

    std::mem::forget(source);

    assert_eq!(format!("{:?}", &target[moved]), expected);
}
