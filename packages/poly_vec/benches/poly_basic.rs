//! Basic benchmarks for the `poly_vec` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::fmt::Debug;
use std::hint::black_box;
use std::iter;
use std::time::Instant;

use criterion::{Criterion, criterion_group, criterion_main};
use poly_vec::{PolyVec, occupant};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[derive(Debug)]
struct Small(u16);

#[derive(Debug)]
struct Large([u64; 6]);

occupant!(dyn Debug: Small, Large);

const FILL_COUNT: usize = 1000;

fn filled() -> PolyVec<dyn Debug> {
    let mut vec = PolyVec::<dyn Debug>::new();

    for i in 0..FILL_COUNT {
        if i % 2 == 0 {
            vec.push_back(Small(7)).unwrap();
        } else {
            vec.push_back(Large([7; 6])).unwrap();
        }
    }

    vec
}

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("poly_basic");

    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(PolyVec::<dyn Debug>::new()));
            }

            start.elapsed()
        });
    });

    group.bench_function("push_back_one", |b| {
        b.iter_custom(|iters| {
            let mut vecs = iter::repeat_with(PolyVec::<dyn Debug>::new)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let start = Instant::now();

            for vec in &mut vecs {
                _ = black_box(vec.push_back(black_box(Small(1))));
            }

            start.elapsed()
        });
    });

    group.bench_function("push_back_mixed_1000", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(filled()));
            }

            start.elapsed()
        });
    });

    group.bench_function("read_one", |b| {
        b.iter_custom(|iters| {
            let vec = filled();

            let start = Instant::now();

            for _ in 0..iters {
                _ = black_box(vec.get(black_box(FILL_COUNT / 2)));
            }

            start.elapsed()
        });
    });

    group.bench_function("iterate_1000", |b| {
        b.iter_custom(|iters| {
            let vec = filled();

            let start = Instant::now();

            for _ in 0..iters {
                for item in &vec {
                    _ = black_box(item);
                }
            }

            start.elapsed()
        });
    });

    group.bench_function("iterate_1000_half_free", |b| {
        b.iter_custom(|iters| {
            let mut vec = filled();

            for index in (0..FILL_COUNT).step_by(2) {
                vec.free(index).unwrap();
            }

            let start = Instant::now();

            for _ in 0..iters {
                for item in &vec {
                    _ = black_box(item);
                }
            }

            start.elapsed()
        });
    });

    group.finish();
}
