//! # SIMD Benchmarks
//!
//! Kernels de lote usados pelo interpretador SSMD.
//!
//! Run: `cargo bench --bench simd_bench`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use blast_core::simd::{
    AddOp, MulOp, fill_array, load_indexed, op_array, op_array_constant, op_indexed_constant,
    store_indexed,
};

const SIZES: [usize; 3] = [64, 1024, 16384];

fn records(n: usize, record_size: usize) -> Vec<Vec<u8>> {
    (0..n)
        .map(|i| {
            let mut record = vec![0u8; record_size];
            record[..4].copy_from_slice(&(i as f32).to_ne_bytes());
            record
        })
        .collect()
}

/// Registradores contíguos
fn bench_array_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("simd_array");

    for n in SIZES {
        group.throughput(Throughput::Elements(n as u64));
        let rhs: Vec<f32> = (0..n).map(|i| i as f32).collect();
        let mut acc = vec![0.0f32; n];

        group.bench_with_input(BenchmarkId::new("op_array_add", n), &n, |b, _| {
            fill_array::<1>(&mut acc, [1.0]);
            b.iter(|| op_array::<AddOp>(black_box(&mut acc), black_box(&rhs)))
        });

        group.bench_with_input(BenchmarkId::new("op_array_constant_mul_f4", n), &n, |b, _| {
            b.iter(|| op_array_constant::<4, MulOp>(black_box(&mut acc), [1.0, 0.5, 2.0, 1.0]))
        });
    }

    group.finish();
}

/// Operandos em offset fixo de cada registro
fn bench_indexed_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("simd_indexed");

    for n in SIZES {
        group.throughput(Throughput::Elements(n as u64));
        let mut data = records(n, 16);
        let mut scratch = vec![0.0f32; n];

        group.bench_with_input(BenchmarkId::new("load_store_f1", n), &n, |b, _| {
            b.iter(|| {
                load_indexed::<1, _>(&mut scratch, &data, 0, false);
                store_indexed::<1, _>(black_box(&mut data), 4, &scratch);
            })
        });

        group.bench_with_input(BenchmarkId::new("op_indexed_constant_add", n), &n, |b, _| {
            b.iter(|| op_indexed_constant::<1, AddOp, _>(black_box(&mut data), 4, [1.0], true))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_array_kernels, bench_indexed_kernels);
criterion_main!(benches);
