use std::sync::Arc;

use compose_core::{
    emit_node, Composition, DefaultScheduler, MemoryApplier, MemoryNode, MutableState, Runtime,
};
use compose_macros::composable;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

#[composable]
fn static_label(label: &'static str) {
    emit_node(|| MemoryNode::new(label), || {});
}

#[composable]
fn label_column(rows: usize) {
    emit_node(
        || MemoryNode::new("column"),
        || {
            for _ in 0..rows {
                static_label("row");
            }
        },
    );
}

fn skip_recomposition_static_label(c: &mut Criterion) {
    let runtime = Runtime::new(Arc::new(DefaultScheduler));
    let mut composition = Composition::new(MemoryApplier::new(), &runtime);
    composition
        .set_content(|| label_column(100))
        .expect("initial composition");

    c.bench_function("skip_recomposition_static_column", |b| {
        b.iter(|| composition.compose().expect("recompose"));
    });
}

fn restart_single_scope(c: &mut Criterion) {
    let runtime = Runtime::new(Arc::new(DefaultScheduler));
    let mut composition = Composition::new(MemoryApplier::new(), &runtime);
    let count = MutableState::new(0u64, &runtime.handle());
    {
        let count = count.clone();
        composition
            .set_content(move || {
                label_column(100);
                let value = count.get();
                emit_node(|| MemoryNode::new(value.to_string()), || {});
            })
            .expect("initial composition");
    }

    c.bench_function("restart_root_with_skipped_column", |b| {
        b.iter(|| {
            count.update(|value| *value += 1);
            composition.recompose().expect("recompose");
        });
    });
}

fn compose_wide_column(c: &mut Criterion) {
    let mut group = c.benchmark_group("initial_composition_wide_column");
    for rows in [2_000usize, 8_000] {
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            b.iter(|| {
                let runtime = Runtime::new(Arc::new(DefaultScheduler));
                let mut composition = Composition::new(MemoryApplier::new(), &runtime);
                composition
                    .set_content(move || label_column(rows))
                    .expect("initial composition");
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    skip_recomposition_static_label,
    restart_single_scope,
    compose_wide_column
);
criterion_main!(benches);
