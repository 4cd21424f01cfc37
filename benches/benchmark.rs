// Resolve throughput over corpora of increasing size
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use std::sync::Arc;
use visage::{ClassifierCache, IdentityResolver, MemoryModelCache, Thresholds, Vector, VectorCorpus};
use visage_core::classifier::TrainingParams;

const DIM: usize = 128;

fn generate_random_vector(rng: &mut impl Rng, dim: usize) -> Vector {
    let data: Vec<f32> = (0..dim).map(|_| rng.random_range(-1.0f32..1.0f32)).collect();
    Vector::new(data)
}

fn generate_corpus(labels: usize, per_label: usize) -> VectorCorpus {
    let mut rng = StdRng::seed_from_u64(7);
    let mut corpus = VectorCorpus::new(DIM);
    for label in 0..labels {
        let center = generate_random_vector(&mut rng, DIM);
        for _ in 0..per_label {
            let jitter = generate_random_vector(&mut rng, DIM);
            let data = center
                .as_slice()
                .iter()
                .zip(jitter.as_slice())
                .map(|(c, j)| c + 0.1 * j)
                .collect();
            corpus.append(format!("person-{}", label), Vector::new(data)).unwrap();
        }
    }
    corpus
}

fn quick_classifier() -> ClassifierCache {
    ClassifierCache::with_params(
        Arc::new(MemoryModelCache::new()),
        TrainingParams {
            epochs: 50,
            ..TrainingParams::default()
        },
    )
}

fn benchmark_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    for labels in [10, 100, 500].iter() {
        let corpus = generate_corpus(*labels, 10);
        let (resolver, _) =
            IdentityResolver::build(&corpus, &quick_classifier(), Thresholds::default()).unwrap();
        let query = generate_random_vector(&mut StdRng::seed_from_u64(42), DIM);

        group.bench_with_input(BenchmarkId::new("dual_gate", corpus.len()), &query, |b, q| {
            b.iter(|| black_box(resolver.resolve(black_box(q)).unwrap()));
        });
    }

    group.finish();
}

fn benchmark_train(c: &mut Criterion) {
    let mut group = c.benchmark_group("train");
    group.sample_size(10);

    for labels in [10, 50].iter() {
        let corpus = generate_corpus(*labels, 10);
        group.bench_with_input(BenchmarkId::new("softmax", corpus.len()), &corpus, |b, corpus| {
            b.iter(|| black_box(visage_core::classifier::train(corpus, &TrainingParams::default()).unwrap()));
        });
    }

    group.finish();
}

fn benchmark_concurrent_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_resolve");

    let corpus = generate_corpus(100, 10);
    let (resolver, _) =
        IdentityResolver::build(&corpus, &quick_classifier(), Thresholds::default()).unwrap();
    let resolver = Arc::new(resolver);
    let query = generate_random_vector(&mut StdRng::seed_from_u64(42), DIM);

    group.bench_function("resolve_10_threads", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..10)
                .map(|_| {
                    let resolver = resolver.clone();
                    let q = query.clone();
                    std::thread::spawn(move || resolver.resolve(&q).unwrap())
                })
                .collect();

            for handle in handles {
                black_box(handle.join().unwrap());
            }
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_resolve, benchmark_train, benchmark_concurrent_resolve);
criterion_main!(benches);
