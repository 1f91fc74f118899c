// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pixel-kernel throughput: wire 4:2:2 10-bit <-> planar on a 1080p
//! frame, per tier.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hmx::io::MemcpyDma;
use hmx::kernels::{dma, scalar, wide, DmaStagedCtx};

const W: u32 = 1920;
const H: u32 = 1080;

fn bench_decode(c: &mut Criterion) {
    let cnt = (W * H / 2) as usize;
    let packed: Vec<u8> = (0..cnt * 5).map(|_| fastrand::u8(..)).collect();
    let mut y = vec![0u16; cnt * 2];
    let mut b = vec![0u16; cnt];
    let mut r = vec![0u16; cnt];

    let mut group = c.benchmark_group("pg422be10_to_planar10");
    group.throughput(Throughput::Bytes((cnt * 5) as u64));
    group.bench_function(BenchmarkId::new("tier", "scalar"), |bencher| {
        bencher.iter(|| {
            scalar::pg422be10_to_planar10(&packed, &mut y, &mut b, &mut r, W, H).unwrap();
        })
    });
    group.bench_function(BenchmarkId::new("tier", "wide"), |bencher| {
        bencher.iter(|| {
            wide::pg422be10_to_planar10(&packed, &mut y, &mut b, &mut r, W, H).unwrap();
        })
    });
    let engine = MemcpyDma::new();
    let mut ctx = DmaStagedCtx::default();
    group.bench_function(BenchmarkId::new("tier", "dma-staged"), |bencher| {
        bencher.iter(|| {
            dma::pg422be10_to_planar10(&engine, &mut ctx, &packed, &mut y, &mut b, &mut r, W, H)
                .unwrap();
        })
    });
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let cnt = (W * H / 2) as usize;
    let y: Vec<u16> = (0..cnt * 2).map(|_| fastrand::u16(..) & 0x3ff).collect();
    let b: Vec<u16> = (0..cnt).map(|_| fastrand::u16(..) & 0x3ff).collect();
    let r: Vec<u16> = (0..cnt).map(|_| fastrand::u16(..) & 0x3ff).collect();
    let mut packed = vec![0u8; cnt * 5];

    let mut group = c.benchmark_group("planar10_to_pg422be10");
    group.throughput(Throughput::Bytes((cnt * 5) as u64));
    group.bench_function(BenchmarkId::new("tier", "scalar"), |bencher| {
        bencher.iter(|| {
            scalar::planar10_to_pg422be10(&y, &b, &r, &mut packed, W, H).unwrap();
        })
    });
    group.bench_function(BenchmarkId::new("tier", "wide"), |bencher| {
        bencher.iter(|| {
            wide::planar10_to_pg422be10(&y, &b, &r, &mut packed, W, H).unwrap();
        })
    });
    group.finish();
}

fn bench_v210(c: &mut Criterion) {
    let cnt = (W * H / 2) as usize;
    let packed: Vec<u8> = (0..cnt * 5).map(|_| fastrand::u8(..)).collect();
    let mut v210 = vec![0u8; cnt / 3 * 16];

    let mut group = c.benchmark_group("pg422be10_to_v210");
    group.throughput(Throughput::Bytes((cnt * 5) as u64));
    group.bench_function("scalar", |bencher| {
        bencher.iter(|| {
            scalar::pg422be10_to_v210(&packed, &mut v210, W, H).unwrap();
        })
    });
    group.finish();
}

criterion_group!(benches, bench_decode, bench_encode, bench_v210);
criterion_main!(benches);
