//! Softmax versus coordinate-descent normalisation cost.
//! Run with: `cargo bench -p attention --bench solver`

use attention::masks::causal_allow_mask;
use attention::{build_attention, Config, CoorDescentConfig};
use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn bench_normalizers(c: &mut Criterion) {
    let device = Device::Cpu;
    let batch = 2usize;
    let heads = 4usize;
    let head_dim = 64usize;

    for &seq_len in &[64usize, 256] {
        let mut group = c.benchmark_group(format!("normalizer/seq{seq_len}"));
        let shape = (batch, heads, seq_len, head_dim);
        let q = Tensor::randn(0f32, 1.0, shape, &device).expect("q");
        let k = Tensor::randn(0f32, 1.0, shape, &device).expect("k");
        let v = Tensor::randn(0f32, 1.0, shape, &device).expect("v");
        let mask = causal_allow_mask(&device, seq_len, seq_len).expect("mask");
        group.throughput(Throughput::Elements((batch * heads * seq_len * seq_len) as u64));

        let softmax = build_attention(&Config::softmax()).expect("softmax kernel");
        group.bench_function("softmax", |b| {
            b.iter(|| {
                let out = softmax
                    .attend(black_box(&q), &k, &v, Some(&mask))
                    .expect("softmax attend");
                black_box(out);
            })
        });

        for &n_iters in &[10usize, 50] {
            let config = Config::coor_descent(CoorDescentConfig {
                n_iters,
                ..CoorDescentConfig::default()
            });
            let kernel = build_attention(&config).expect("coor descent kernel");
            group.bench_with_input(BenchmarkId::new("coor_descent", n_iters), &q, |b, q| {
                b.iter(|| {
                    let out = kernel
                        .attend(black_box(q), &k, &v, Some(&mask))
                        .expect("coor descent attend");
                    black_box(out);
                })
            });
        }
        group.finish();
    }

    let scores = Tensor::randn(0f32, 1.0, (batch, heads, 128, 128), &device)
        .and_then(|t| t.to_dtype(DType::BF16))
        .expect("scores");
    let unit_k = Tensor::new(1f32, &device).expect("k");
    c.bench_function("solver/bf16/128x128/n50", |b| {
        b.iter(|| {
            let out = attention::sparse::coor_descent(
                black_box(&scores),
                50,
                &unit_k,
                0.1,
                attention::sparse::relu_clamp,
                None,
            )
            .expect("solver");
            black_box(out);
        })
    });
}

criterion_group!(benches, bench_normalizers);
criterion_main!(benches);
