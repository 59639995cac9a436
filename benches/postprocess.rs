//! Micro-benchmarks for the spectral post-filter and the STFT it runs on.
//!
//! Run with: `cargo bench -- postprocess`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use kokoro_onnx::audio::{SpectralPostProcessor, Stft, SAMPLE_RATE};
use std::f32::consts::PI;
use std::hint::black_box;

/// Two tones at 24 kHz: one kept by the low-pass, one removed.
fn test_signal(duration_secs: f32) -> Vec<f32> {
    let n = (duration_secs * SAMPLE_RATE as f32) as usize;
    (0..n)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            (2.0 * PI * 220.0 * t).sin() + 0.5 * (2.0 * PI * 6000.0 * t).sin()
        })
        .collect()
}

fn bench_postprocess(c: &mut Criterion) {
    let post = SpectralPostProcessor::default();
    let mut group = c.benchmark_group("postprocess");

    for duration in [0.5, 2.0, 10.0] {
        let samples = test_signal(duration);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{duration}s")),
            &duration,
            |b, _| {
                b.iter(|| post.process(black_box(&samples)));
            },
        );
    }
    group.finish();
}

fn bench_stft_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("stft");

    for n_fft in [20usize, 100] {
        let stft = Stft::with_default_hop(n_fft);
        let samples = test_signal(2.0);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("n_fft{n_fft}_2s")),
            &n_fft,
            |b, _| {
                b.iter(|| stft.inverse(&stft.forward(black_box(&samples))));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_postprocess, bench_stft_roundtrip);
criterion_main!(benches);
