//! Benchmarks for weft
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use weft::{autorun, derived, keep_observed, observable_value, transaction, Observable};

// =============================================================================
// VALUE BENCHMARKS
// =============================================================================

fn bench_value_create(c: &mut Criterion) {
    c.bench_function("value_create", |b| b.iter(|| black_box(observable_value(0i32))));
}

fn bench_value_get(c: &mut Criterion) {
    let value = observable_value(42i32);
    c.bench_function("value_get", |b| b.iter(|| black_box(value.get())));
}

fn bench_value_set(c: &mut Criterion) {
    let value = observable_value(0i32);
    let mut next = 0i32;
    c.bench_function("value_set", |b| {
        b.iter(|| {
            next = next.wrapping_add(1);
            value.set(black_box(next), None)
        })
    });
}

fn bench_value_set_equal(c: &mut Criterion) {
    let value = observable_value(42i32);
    c.bench_function("value_set_equal", |b| b.iter(|| value.set(black_box(42), None)));
}

// =============================================================================
// DERIVED BENCHMARKS
// =============================================================================

fn bench_derived_cached_read(c: &mut Criterion) {
    let source = observable_value(1i32);
    let doubled = {
        let source = source.clone();
        derived(move |reader| source.read(reader) * 2)
    };
    let _keep = keep_observed(&doubled);
    doubled.get();

    c.bench_function("derived_cached_read", |b| b.iter(|| black_box(doubled.get())));
}

fn bench_derived_invalidate_and_read(c: &mut Criterion) {
    let source = observable_value(0i32);
    let doubled = {
        let source = source.clone();
        derived(move |reader| source.read(reader) * 2)
    };
    let _keep = keep_observed(&doubled);

    let mut next = 0i32;
    c.bench_function("derived_invalidate_and_read", |b| {
        b.iter(|| {
            next = next.wrapping_add(1);
            source.set(next, None);
            black_box(doubled.get())
        })
    });
}

fn bench_derived_chain_depth_10(c: &mut Criterion) {
    let source = observable_value(0i32);
    let mut tail = {
        let source = source.clone();
        derived(move |reader| source.read(reader) + 1)
    };
    for _ in 0..9 {
        let previous = tail.clone();
        tail = derived(move |reader| previous.read(reader) + 1);
    }
    let _keep = keep_observed(&tail);

    let mut next = 0i32;
    c.bench_function("derived_chain_depth_10", |b| {
        b.iter(|| {
            next = next.wrapping_add(1);
            source.set(next, None);
            black_box(tail.get())
        })
    });
}

// =============================================================================
// TRANSACTION BENCHMARKS
// =============================================================================

fn bench_transaction_batched_autorun(c: &mut Criterion) {
    let a = observable_value(0i32);
    let b_value = observable_value(0i32);
    let _run = autorun({
        let a = a.clone();
        let b_value = b_value.clone();
        move |reader| {
            black_box(a.read(reader) + b_value.read(reader));
        }
    });

    let mut next = 0i32;
    c.bench_function("transaction_batched_autorun", |b| {
        b.iter(|| {
            next = next.wrapping_add(1);
            transaction(|tx| {
                a.set(next, Some(tx));
                b_value.set(-next, Some(tx));
            })
        })
    });
}

criterion_group!(
    benches,
    bench_value_create,
    bench_value_get,
    bench_value_set,
    bench_value_set_equal,
    bench_derived_cached_read,
    bench_derived_invalidate_and_read,
    bench_derived_chain_depth_10,
    bench_transaction_batched_autorun,
);
criterion_main!(benches);
