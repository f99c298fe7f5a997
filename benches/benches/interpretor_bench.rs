//! # Interpretor Benchmarks
//!
//! Escalar vs SSMD vs SSMD paralelo sobre o mesmo script.
//!
//! Run: `cargo bench --bench interpretor_bench`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use blast_core::prelude::*;

/// `b = a * 3 - 1; c = max(a, b) + 0.5`
fn package(mode: PackageMode) -> BlastPackage {
    let mut builder = BlastPackageBuilder::new();
    let a = builder.scalar("a", 2.0).unwrap();
    let b = builder.scalar("b", 0.0).unwrap();
    let c = builder.scalar("c", 0.0).unwrap();

    let mut w = BytecodeWriter::new();
    w.assign(b).id(a).op(BlastOpcode::Multiply).constant(3.0);
    w.op(BlastOpcode::Substract).constant(1.0).nop();
    w.assign(c).op(BlastOpcode::Max).id(a).id(b);
    w.op(BlastOpcode::Add).constant(0.5).nop();
    w.ret();

    builder.with_code(w.finish()).build(mode).unwrap()
}

fn bench_scalar(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpretor_scalar");
    let engine = BlastEngine::default();
    let mut package = package(PackageMode::Normal);

    group.bench_function("checked", |b| {
        let interpretor = BlastInterpretor::<Checked>::new();
        b.iter(|| black_box(interpretor.execute(&engine, &mut package).unwrap()))
    });

    group.bench_function("fast", |b| {
        let interpretor = BlastInterpretor::<Fast>::new();
        b.iter(|| black_box(interpretor.execute(&engine, &mut package).unwrap()))
    });

    group.finish();
}

fn bench_ssmd(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpretor_ssmd");
    let engine = BlastEngine::new(BlastConfig::default().with_ssmd_chunk(1024));
    let mut package = package(PackageMode::Ssmd);

    for n in [32usize, 1024, 16384] {
        group.throughput(Throughput::Elements(n as u64));
        let mut block = package.clone_data_stack(n);
        for record in 0..n {
            block.write_f32(record, 0, record as f32).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("sequential", n), &n, |b, _| {
            let mut interpretor = BlastSSMDInterpretor::<Fast>::new();
            b.iter(|| black_box(interpretor.execute_block(&engine, &mut package, &mut block).unwrap()))
        });

        group.bench_with_input(BenchmarkId::new("parallel", n), &n, |b, _| {
            b.iter(|| black_box(execute_ssmd_parallel::<Fast>(&engine, &mut package, &mut block).unwrap()))
        });

        group.bench_with_input(BenchmarkId::new("scalar_loop", n), &n, |b, _| {
            let interpretor = BlastInterpretor::<Fast>::new();
            let mut single = self::package(PackageMode::Normal);
            b.iter(|| {
                for record in 0..n {
                    single.write_data(0, record as f32).unwrap();
                    black_box(interpretor.execute(&engine, &mut single).unwrap());
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_scalar, bench_ssmd);
criterion_main!(benches);
