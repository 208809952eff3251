use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use facesearch::corpus::{Corpus, EmbeddingRecord};
use facesearch::index::IndexManager;
use rand::prelude::*;

const DIM: usize = 512;

fn random_corpus(rng: &mut impl Rng, n: usize) -> Arc<Corpus> {
    let records = (0..n)
        .map(|i| {
            let v = (0..DIM).map(|_| rng.random_range(-1.0..1.0)).collect();
            EmbeddingRecord::new(format!("p{i}"), v, None)
        })
        .collect();
    Arc::new(Corpus::new("bench", records))
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("Search");
    let mut rng = rand::rng();
    let query = (0..DIM).map(|_| rng.random_range(-1.0..1.0)).collect::<Vec<f32>>();

    for n in [1000, 10000] {
        let corpus = random_corpus(&mut rng, n);
        let brute = IndexManager::new(false).build(&corpus);
        let accelerated = IndexManager::new(true).build(&corpus);

        group.bench_with_input(BenchmarkId::new("brute_force", n), &n, |b, &n| {
            b.iter(|| brute.search(black_box(&query), n).unwrap())
        });
        // 未编译加速索引时退化为暴力扫描
        let name = format!("top100_{}", accelerated.method());
        group.bench_with_input(BenchmarkId::new(name, n), &n, |b, _| {
            b.iter(|| accelerated.search(black_box(&query), 100).unwrap())
        });
    }
    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let mut rng = rand::rng();
    let corpus = random_corpus(&mut rng, 10000);
    c.bench_function("build_accelerated_10000", |b| {
        b.iter(|| IndexManager::new(true).build(black_box(&corpus)))
    });
}

criterion_group!(benches, bench_search, bench_build);
criterion_main!(benches);
