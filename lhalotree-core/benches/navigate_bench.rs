use criterion::{Criterion, criterion_group, criterion_main};
use lhalotree_core::{
    HaloRecord, NONE, Tree, TreeBuilder, breadth_first, depth_first, descendant_chain, progenitors,
};
use std::hint::black_box;

/// Full binary merger tree of the given depth: halo `i` has progenitors
/// `2i + 1` and `2i + 2`
fn binary_tree(depth: u32) -> Tree {
    let n = (1usize << depth) - 1;
    let snap_of = |i: usize| depth as i32 - (usize::BITS - (i + 1).leading_zeros()) as i32;

    let halos = (0..n)
        .map(|i| {
            let first = if 2 * i + 1 < n { (2 * i + 1) as i32 } else { NONE };
            let next = if i % 2 == 1 && i + 1 < n { (i + 1) as i32 } else { NONE };
            let descendant = if i == 0 { NONE } else { ((i - 1) / 2) as i32 };
            HaloRecord::at_snapshot(snap_of(i))
                .with_descendant(descendant)
                .with_progenitors(first, next)
                .with_fof(i as i32, NONE)
        })
        .collect();

    TreeBuilder::new(0).build(halos, n as u32).unwrap()
}

fn bench_walks(c: &mut Criterion) {
    let mut group = c.benchmark_group("navigate");
    let tree = binary_tree(16);
    let deepest = tree.len() as u32 - 1;

    group.bench_function("progenitors_root", |b| {
        b.iter(|| progenitors(&tree, black_box(0)).unwrap().map(Result::unwrap).count())
    });

    group.bench_function("descendant_chain_from_leaf", |b| {
        b.iter(|| descendant_chain(&tree, black_box(deepest)).unwrap().map(Result::unwrap).count())
    });

    group.bench_function("depth_first_full", |b| {
        b.iter(|| depth_first(&tree, 0).unwrap().map(Result::unwrap).count())
    });

    group.bench_function("breadth_first_full", |b| {
        b.iter(|| breadth_first(&tree, 0).unwrap().map(Result::unwrap).count())
    });

    group.finish();
}

criterion_group!(benches, bench_walks);
criterion_main!(benches);
