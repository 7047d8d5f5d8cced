//! Benchmarks for the hot paths: diamond-shaped update propagation,
//! wide fan-in derivations, and pending-set churn across size tiers.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use rill_core::store::{derive, trigger_strict_not_equal, writable, PendingSet};

fn diamond_update(c: &mut Criterion) {
    c.bench_function("diamond_update", |b| {
        let root = writable(trigger_strict_not_equal, 0i64);
        let lhs = derive(trigger_strict_not_equal, root.clone(), |x| x * 10);
        let rhs = derive(trigger_strict_not_equal, root.clone(), |x| x * 100);
        let combined = derive(
            trigger_strict_not_equal,
            (lhs, rhs),
            |(a, b): &(i64, i64)| a + b,
        );
        let _sub = combined.subscribe(|v| {
            black_box(v);
        });

        let mut n = 0i64;
        b.iter(|| {
            n += 1;
            root.set(n);
        });
    });
}

fn wide_fan_in(c: &mut Criterion) {
    c.bench_function("fan_in_128", |b| {
        let sources: Vec<_> = (0..128)
            .map(|i| writable(trigger_strict_not_equal, i as i64))
            .collect();
        let total = derive(
            trigger_strict_not_equal,
            sources.clone(),
            |values: &Vec<i64>| values.iter().sum::<i64>(),
        );
        let _sub = total.subscribe(|v| {
            black_box(v);
        });

        let mut n = 0i64;
        b.iter(|| {
            n += 1;
            sources[(n as usize) % 128].set(n);
        });
    });
}

fn pending_set_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("pending_set");
    for size in [1usize, 32, 4096] {
        group.bench_function(format!("churn_{size}"), |b| {
            let mut set = PendingSet::new(size);
            b.iter(|| {
                for i in 0..size {
                    set.invalidate(i);
                }
                for i in 0..size {
                    set.validate(i);
                }
                black_box(set.pending())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, diamond_update, wide_fan_in, pending_set_churn);
criterion_main!(benches);
