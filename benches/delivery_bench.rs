use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vbostream::sim::{OrbitFetcher, OrbitStepper};
use vbostream::streaming::{BufferCache, BufferSet, CompletionBarrier, Encoding};
use vbostream::tick::Stepper;

fn buffer_names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("buffer{}", i)).collect()
}

fn bench_barrier_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("barrier_cycle");

    for count in [2usize, 8, 32].iter() {
        let names = buffer_names(*count);
        let barrier = CompletionBarrier::new();

        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            let mut cycle = 0u64;
            b.iter(|| {
                cycle += 1;
                let _wait = barrier.arm(cycle, names.iter());
                for name in names.iter().rev() {
                    black_box(barrier.record(cycle, name));
                }
            });
        });
    }
    group.finish();
}

fn bench_cache_replace_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_replace_get");

    for count in [2usize, 8, 32].iter() {
        let names = buffer_names(*count);
        let mut set = BufferSet::new(1, Encoding::Gzip);
        for name in &names {
            set.insert(name.as_str(), Bytes::from(vec![7u8; 64 * 1024]), 64 * 1024, 1);
        }
        let cache = BufferCache::new();

        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            let mut cycle = 0u64;
            b.iter(|| {
                cycle += 1;
                cache.replace(cycle, &set);
                for name in &names {
                    black_box(cache.get(name, Some(cycle)).is_ok());
                }
            });
        });
    }
    group.finish();
}

fn bench_orbit_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("orbit_build");
    let buffers = vec!["position".to_string(), "color".to_string()];

    for points in [1_000usize, 10_000].iter() {
        let state = OrbitStepper::new(*points).step().expect("stepper runs");

        for encoding in [Encoding::Gzip, Encoding::Zstd] {
            let fetcher = OrbitFetcher::new(encoding, 3);
            let id = BenchmarkId::new(encoding.content_encoding(), points);
            group.bench_with_input(id, points, |b, _| {
                b.iter(|| fetcher.build(1, black_box(&state), &buffers, &[]).unwrap());
            });
        }
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_barrier_cycle,
    bench_cache_replace_get,
    bench_orbit_build
);
criterion_main!(benches);
