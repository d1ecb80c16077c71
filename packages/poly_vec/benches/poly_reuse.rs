//! Benchmarks for freeing and reusing slots in the `poly_vec` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::time::Instant;

use criterion::{Criterion, criterion_group, criterion_main};
use poly_vec::{PolyVec, occupant};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

type TestItem = [u64; 4];
const TEST_VALUE: TestItem = [1024; 4];

trait Payload {}

struct One(#[expect(dead_code, reason = "only occupies space")] u64);
struct Four(#[expect(dead_code, reason = "only occupies space")] [u64; 4]);

impl Payload for One {}
impl Payload for Four {}

occupant!(dyn Payload: One, Four);

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("poly_reuse");

    group.bench_function("free_then_push", |b| {
        b.iter_custom(|iters| {
            let mut vec = PolyVec::<TestItem>::new();
            let index = vec.push(TEST_VALUE).unwrap();

            let start = Instant::now();

            for _ in 0..iters {
                vec.free(black_box(index)).unwrap();
                _ = black_box(vec.push(black_box(TEST_VALUE)));
            }

            start.elapsed()
        });
    });

    // The only fitting free slot is at the end of a long free list.
    group.bench_function("first_fit_scan_100", |b| {
        b.iter_custom(|iters| {
            let mut vec = PolyVec::<dyn Payload>::new();

            let start = Instant::now();

            for _ in 0..iters {
                vec.free_all();

                for _ in 0..100 {
                    vec.push_back(One(0)).unwrap();
                }
                let large = vec.push_back(Four([0; 4])).unwrap();

                for index in 0..100 {
                    vec.free(index).unwrap();
                }
                vec.free(large).unwrap();

                _ = black_box(vec.push(black_box(Four([1; 4]))));
            }

            start.elapsed()
        });
    });

    group.bench_function("free_all_100", |b| {
        b.iter_custom(|iters| {
            let mut vec = PolyVec::<TestItem>::new();

            let start = Instant::now();

            for _ in 0..iters {
                for _ in 0..100 {
                    vec.push_back(TEST_VALUE).unwrap();
                }

                vec.free_all();
            }

            start.elapsed()
        });
    });

    group.finish();
}
