//! Throughput of the strided inner loop: typed constant comparators against
//! JIT-compiled predicates over the same buffer.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use libmemsift::comparators::FastCmp;
use libmemsift::expr::Signedness;
use libmemsift::jit;

fn buffer(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn bench_fast_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("fast_path");

    for size in [4096usize, 65536, 1 << 20] {
        let data = buffer(size);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("eq_u32_step4", size), &data, |b, data| {
            let cmp = FastCmp::Eq(0x2a2a2a2au32);
            b.iter(|| {
                let mut hits = 0usize;
                let mut offset = 0;
                while offset + 4 <= data.len() {
                    let v = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());
                    if cmp.accept(black_box(v)) {
                        hits += 1;
                    }
                    offset += 4;
                }
                hits
            });
        });

        group.bench_with_input(
            BenchmarkId::new("range_u32_step1", size),
            &data,
            |b, data| {
                let cmp = FastCmp::Range {
                    lo: 100u32,
                    hi: 200,
                    invert: false,
                };
                b.iter(|| {
                    let mut hits = 0usize;
                    let mut offset = 0;
                    while offset + 4 <= data.len() {
                        let v = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());
                        if cmp.accept(black_box(v)) {
                            hits += 1;
                        }
                        offset += 1;
                    }
                    hits
                });
            },
        );
    }
    group.finish();
}

fn bench_jit_predicate(c: &mut Criterion) {
    let mut group = c.benchmark_group("jit_predicate");

    let code = jit::compile_expression("$new >= 100 && $new <= 200", Signedness::Unsigned)
        .expect("compile");

    for size in [4096usize, 65536] {
        let data = buffer(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("range_u32_step4", size), &data, |b, data| {
            b.iter(|| {
                let mut hits = 0usize;
                let mut offset = 0;
                while offset + 4 <= data.len() {
                    let v = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());
                    if code.call(0, black_box(v as u64), offset as u64) != 0 {
                        hits += 1;
                    }
                    offset += 4;
                }
                hits
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fast_path, bench_jit_predicate);
criterion_main!(benches);
