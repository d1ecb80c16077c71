//! Demonstrates the builder and the configuration options of `PolyVec`.
//!
//! This example shows how the offset type, the addressing granularity, the maximum buffer
//! size and the drop policy affect a container.

use std::fmt::Debug;

use poly_vec::{DropPolicy, Error, Granularity, OffsetWidth, PolyVec};

fn main() {
    println!("=== PolyVec Builder Pattern Examples ===");
    println!();

    // Example 1: Defaults
    println!("Example 1: Default configuration");
    println!("--------------------------------");

    let vec = PolyVec::<dyn Debug>::new();
    println!("  {vec:?}");
    println!();

    // Example 2: Narrow offsets
    println!("Example 2: 8-bit offsets");
    println!("------------------------");

    let mut narrow = PolyVec::<[u8; 64], u8>::new();
    let mut stored = 0;

    loop {
        match narrow.push_back([0; 64]) {
            Ok(_) => stored += 1,
            Err(Error::CapacityExceeded { requested, limit }) => {
                println!("  stored {stored} items; the next would end at {requested} > {limit}");
                break;
            }
            Err(error) => panic!("unexpected error: {error}"),
        }
    }
    println!();

    // Example 3: Word granularity stretches narrow offsets
    println!("Example 3: 8-bit offsets with word granularity");
    println!("----------------------------------------------");

    let mut stretched = PolyVec::<[u8; 64], u8>::builder()
        .granularity(Granularity::Word)
        .build();
    let mut stored = 0;

    while stretched.push_back([0; 64]).is_ok() {
        stored += 1;
    }
    println!(
        "  stored {stored} items within a {} byte limit",
        stretched.max_buffer_size()
    );
    println!();

    // Example 4: Choosing an offset width for a known limit
    println!("Example 4: Picking the narrowest offset width");
    println!("---------------------------------------------");

    for limit in [200, 60_000, 1 << 20] {
        println!(
            "  {limit:>8} bytes: {:?} at byte granularity, {:?} at word granularity",
            OffsetWidth::narrowest_for(limit, Granularity::Byte),
            OffsetWidth::narrowest_for(limit, Granularity::Word),
        );
    }
    println!();

    // Example 5: Explicit limit and preallocation
    println!("Example 5: Explicit limit and preallocation");
    println!("-------------------------------------------");

    let limited = PolyVec::<u64, u32>::builder()
        .max_buffer_size(4096)
        .buffer_capacity(1024)
        .slot_capacity(128)
        .build();
    println!(
        "  limit {} bytes, buffer capacity {}, slot capacity {}",
        limited.max_buffer_size(),
        limited.buffer_capacity(),
        limited.slot_capacity()
    );
    println!();

    // Example 6: Drop policy
    println!("Example 6: Drop policy that forbids dropping occupants");
    println!("------------------------------------------------------");

    let mut strict = PolyVec::<String>::builder()
        .drop_policy(DropPolicy::MustNotDropItems)
        .build();
    let index = strict.push("temporary".to_string()).expect("buffer has room");
    println!("  holding {:?}", strict[index]);

    // The container must be emptied before it is dropped.
    strict.free(index).expect("slot is live");
    drop(strict);
    println!("  dropped cleanly after freeing every occupant");
}
