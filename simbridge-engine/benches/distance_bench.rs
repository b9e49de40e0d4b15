//! Distance kernel and search benchmarks
//!
//! Run with: cargo bench --package simbridge-engine

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::Rng;

use simbridge_engine::registry::create_dense_float_space;
use simbridge_engine::space::levenshtein;
use simbridge_engine::{create_method, simd, KnnQueue, QueryRecord, Record, SearchContext};

fn random_vec(dim: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn random_bytes(dim: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..dim).map(|_| rng.gen()).collect()
}

fn bench_dense_kernels(c: &mut Criterion) {
    let dims = [128, 384, 768];

    let mut group = c.benchmark_group("dense_f32");
    for dim in dims {
        let a = random_vec(dim);
        let b = random_vec(dim);

        group.throughput(Throughput::Elements(1));
        group.bench_function(format!("l2sqr_dim_{}", dim), |bencher| {
            bencher.iter(|| black_box(simd::l2_distance_squared(black_box(&a), black_box(&b))))
        });
        group.bench_function(format!("cosine_dim_{}", dim), |bencher| {
            bencher.iter(|| black_box(simd::cosine_distance(black_box(&a), black_box(&b))))
        });
    }
    group.finish();
}

fn bench_byte_kernels(c: &mut Criterion) {
    let a = random_bytes(128);
    let b = random_bytes(128);

    let mut group = c.benchmark_group("dense_u8");
    group.throughput(Throughput::Elements(1));
    group.bench_function("l2sqr_sift_dim_128", |bencher| {
        bencher.iter(|| black_box(simd::l2_squared_u8(black_box(&a), black_box(&b))))
    });
    group.finish();
}

fn bench_levenshtein(c: &mut Criterion) {
    let a = b"similarity search over length-prefixed strings";
    let b = b"similarity searches over length prefixed string";
    c.bench_function("levenshtein_sentence", |bencher| {
        bencher.iter(|| black_box(levenshtein(black_box(a), black_box(b))))
    });
}

fn bench_knn(c: &mut Criterion) {
    let space = create_dense_float_space("l2", &[]).unwrap();
    let n = 5000;
    let records: Vec<Record<f32>> = (0..n).map(|i| Record::from_vec(i as i32, random_vec(64))).collect();
    let ctx = SearchContext::new(space.as_ref(), &records);
    let query = random_vec(64);

    let mut group = c.benchmark_group("knn_n_5000_k_10");
    for name in ["brute_force", "vamana"] {
        let mut method = create_method::<f32, f32>(name).unwrap();
        method.build(ctx, &[], false).unwrap();

        group.bench_function(name, |bencher| {
            bencher.iter(|| {
                let mut queue = KnnQueue::new(10);
                method.search_knn(ctx, &QueryRecord::new(&query), &mut queue).unwrap();
                black_box(queue.len())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_dense_kernels, bench_byte_kernels, bench_levenshtein, bench_knn);
criterion_main!(benches);
