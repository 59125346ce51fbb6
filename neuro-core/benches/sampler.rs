use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use neuro_core::generation::GenerationParams;
use neuro_core::sampler::{apply_top_k, apply_top_p, softmax_in_place, Sampler};

const VOCAB: usize = 32_000;

fn logits() -> Vec<f32> {
    (0..VOCAB)
        .map(|i| ((i * 7919) % 1000) as f32 / 100.0 - 5.0)
        .collect()
}

/// Truncation steps on their own over a full vocabulary
fn benchmark_truncation(c: &mut Criterion) {
    let mut group = c.benchmark_group("truncation");
    let base = logits();

    for k in [1usize, 40, 1000] {
        group.bench_with_input(BenchmarkId::new("top_k", k), &k, |b, &k| {
            b.iter(|| {
                let mut scratch = base.clone();
                apply_top_k(black_box(&mut scratch), k)
            });
        });
    }

    group.bench_function("top_p_0.9", |b| {
        b.iter(|| {
            let mut scratch = base.clone();
            apply_top_p(black_box(&mut scratch), 0.9)
        });
    });

    group.bench_function("softmax", |b| {
        b.iter(|| {
            let mut scratch = base.clone();
            softmax_in_place(black_box(&mut scratch));
            scratch
        });
    });

    group.finish();
}

/// Whole pipeline as run once per generated token
fn benchmark_sample(c: &mut Criterion) {
    let mut group = c.benchmark_group("sample");
    let base = logits();
    let history: Vec<u32> = (100..164).collect();
    let mut sampler = Sampler::new(Some(1));

    group.bench_function("default_params", |b| {
        let params = GenerationParams::default();
        b.iter(|| {
            let mut scratch = base.clone();
            sampler.sample(black_box(&mut scratch), &history, &params)
        });
    });

    group.bench_function("greedy", |b| {
        let params = GenerationParams {
            temperature: 0.0,
            ..Default::default()
        };
        b.iter(|| {
            let mut scratch = base.clone();
            sampler.sample(black_box(&mut scratch), &history, &params)
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_truncation, benchmark_sample);
criterion_main!(benches);
