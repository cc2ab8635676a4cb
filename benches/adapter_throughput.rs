// SPDX-License-Identifier: MIT OR Apache-2.0
//! Throughput of generator-driven stages for varying queue sizes, plus a
//! full JSON Lines parse.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use futures::StreamExt;
use tokio::runtime::Runtime;

use jsonlines::{ChunkReader, QueuingPolicy, Sequence, StageConfig, TransformBuilder, parse_stream};

// ── Helpers ─────────────────────────────────────────────────────────────

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn map_stage(n: u64, hwm: usize) -> u64 {
    let stage = TransformBuilder::new()
        .writable_policy(QueuingPolicy::count(hwm))
        .readable_policy(QueuingPolicy::count(hwm))
        .build(|src: ChunkReader<u64>| Sequence::try_stream(src.map(|c| c.map(|v| v + 1))))
        .unwrap();
    stage
        .pipe_from(futures::stream::iter(0..n))
        .fold(0, |acc, v| async move { acc + v.unwrap() })
        .await
}

fn jsonl_text(lines: usize) -> Vec<String> {
    (0..lines)
        .map(|i| format!("{{\"id\":{i},\"name\":\"item-{i}\",\"tags\":[\"a\",\"b\"]}}\n"))
        .collect::<Vec<_>>()
        .chunks(16)
        .map(|c| c.concat())
        .collect()
}

// ── Benchmarks ──────────────────────────────────────────────────────────

fn bench_map_stage(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("map_stage");
    let n = 10_000u64;
    group.throughput(Throughput::Elements(n));
    for hwm in [0usize, 1, 16, 256] {
        group.bench_with_input(BenchmarkId::new("hwm", hwm), &hwm, |b, &hwm| {
            b.iter(|| rt.block_on(map_stage(black_box(n), hwm)));
        });
    }
    group.finish();
}

fn bench_sync_generator(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("sync_generator");
    let n = 10_000u64;
    group.throughput(Throughput::Elements(n));
    group.bench_function("drain", |b| {
        b.iter(|| {
            rt.block_on(async {
                let stage = TransformBuilder::<(), u64>::new()
                    .build(|_src| Sequence::iter(0..black_box(n)))
                    .unwrap();
                let (_writer, output) = stage.into_parts();
                output.fold(0, |acc, v| async move { acc + v.unwrap() }).await
            })
        });
    });
    group.finish();
}

fn bench_parse_stream(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("parse_stream");
    for lines in [100usize, 1_000] {
        let text = jsonl_text(lines);
        group.throughput(Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::new("lines", lines), &text, |b, text| {
            b.iter(|| {
                rt.block_on(async {
                    parse_stream(futures::stream::iter(text.clone()), &StageConfig::default())
                        .unwrap()
                        .count()
                        .await
                })
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_map_stage,
    bench_sync_generator,
    bench_parse_stream
);
criterion_main!(benches);
