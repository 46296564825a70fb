//! PReLU forward benchmark
//!
//! Sizes: 1K, 4K, 16K, 64K, 256K, 1M
//! Compares: scalar reference vs JIT kernel vs JIT + rayon, plus JIT
//! compile latency.
//!
//! Run with: cargo bench --bench bench_prelu

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use half::bf16;
use rand::Rng;
use std::time::Duration;

use gllm_prelu_jit::{
    prelu_forward_ref, DType, GeneratedKernel, KernelDescriptor, PreluElement, WeightMode,
};

const ELEM_SIZES: &[usize] = &[1024, 4096, 16384, 65536, 262144, 1 << 20];

fn size_label(n: usize) -> String {
    match n {
        n if n >= 1 << 20 => format!("{}M", n >> 20),
        n if n >= 1024 => format!("{}K", n >> 10),
        _ => format!("{n}"),
    }
}

fn random_vec<T: PreluElement>(n: usize) -> Vec<T> {
    let mut rng = rand::thread_rng();
    (0..n).map(|_| T::from_f32(rng.gen_range(-4.0f32..4.0))).collect()
}

fn bench_dtype<T: PreluElement>(c: &mut Criterion, dtype: DType, mode: WeightMode) {
    let mut group = c.benchmark_group(format!("prelu_{}_{}", dtype.name(), mode.name()));
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_secs(2));

    for &n in ELEM_SIZES {
        let desc = KernelDescriptor::new(n, dtype, mode);
        let kernel = match GeneratedKernel::create(desc) {
            Ok(k) => k,
            Err(e) => {
                eprintln!("skipping {} {} n={n}: {e}", dtype.name(), mode.name());
                continue;
            }
        };
        let src = random_vec::<T>(n);
        let weights = random_vec::<T>(mode.weights_len(n));
        let mut dst = vec![T::from_f32(0.0); n];

        // src + dst (+ per-channel weights)
        let bytes = (2 + (mode == WeightMode::PerChannel) as usize) * n * dtype.size_bytes();
        group.throughput(Throughput::Bytes(bytes as u64));

        group.bench_with_input(BenchmarkId::new("reference", size_label(n)), &n, |b, _| {
            b.iter(|| prelu_forward_ref(black_box(&src), black_box(&weights), mode, &mut dst))
        });
        group.bench_with_input(
            BenchmarkId::new(format!("jit_{}", kernel.isa()), size_label(n)),
            &n,
            |b, _| b.iter(|| kernel.forward(black_box(&src), black_box(&weights), &mut dst)),
        );
        group.bench_with_input(BenchmarkId::new("jit_parallel", size_label(n)), &n, |b, _| {
            b.iter(|| kernel.forward_parallel(black_box(&src), black_box(&weights), &mut dst))
        });
    }
    group.finish();
}

fn bench_prelu_f32(c: &mut Criterion) {
    bench_dtype::<f32>(c, DType::F32, WeightMode::Scalar);
    bench_dtype::<f32>(c, DType::F32, WeightMode::PerChannel);
}

fn bench_prelu_bf16(c: &mut Criterion) {
    bench_dtype::<bf16>(c, DType::BF16, WeightMode::Scalar);
    bench_dtype::<bf16>(c, DType::BF16, WeightMode::PerChannel);
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("prelu_jit_compile");
    for &n in &[17usize, 4096, 1 << 20] {
        group.bench_with_input(BenchmarkId::from_parameter(size_label(n)), &n, |b, &n| {
            let desc = KernelDescriptor::new(n, DType::F32, WeightMode::PerChannel);
            b.iter(|| GeneratedKernel::create(black_box(desc)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_prelu_f32, bench_prelu_bf16, bench_compile);
criterion_main!(benches);
