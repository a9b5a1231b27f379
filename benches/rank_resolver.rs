use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use star_forest::graph::{Remote, SfGraph};
use star_forest::ranks::setup_ranks;

/// A synthetic graph with `nleaves` edges spread over `size` owner ranks,
/// clustered in runs the way mesh overlaps tend to be.
fn synthetic_graph(nleaves: usize, size: usize) -> SfGraph {
    let mut rng = StdRng::seed_from_u64(7);
    let mut remote = Vec::with_capacity(nleaves);
    let mut owner = 0usize;
    for _ in 0..nleaves {
        if rng.gen_ratio(1, 8) {
            owner = rng.gen_range(0..size);
        }
        remote.push(Remote::new(owner, rng.gen_range(0..1024)));
    }
    SfGraph::new(1024, nleaves, None, remote, 0, size).unwrap()
}

fn bench_setup_ranks(c: &mut Criterion) {
    let mut group = c.benchmark_group("setup_ranks");
    for &nleaves in &[1_000usize, 10_000, 100_000] {
        let graph = synthetic_graph(nleaves, 64);
        group.bench_with_input(
            BenchmarkId::from_parameter(nleaves),
            &graph,
            |b, graph| b.iter(|| setup_ranks(black_box(graph), &[0]).unwrap()),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_setup_ranks);
criterion_main!(benches);
