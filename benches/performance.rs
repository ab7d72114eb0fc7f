//! Performance benchmarks for the link rate tester
//!
//! The hot paths are per-frame: encoding on the sender, frame recovery on
//! the receiver and the statistics update both roles share. At the fastest
//! practical write intervals these run thousands of times per second.

use clap::Parser;
use std::hint::black_box;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use link_rate_tester::{
    cli::Cli,
    codec,
    executor::FrameSync,
    stats::PacketOutcome,
    LatencyWindow, StatsAggregator, SweepPlan,
};

fn stream_of(frames: u32, payload_len: usize) -> Vec<u8> {
    (0..frames)
        .flat_map(|seq| codec::encode(seq, f64::from(seq) * 0.01, &codec::payload_for(seq, payload_len)))
        .collect()
}

/// Benchmark frame encoding and decoding across packet sizes
fn benchmark_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for size in [64usize, 700, 4096] {
        let payload = codec::payload_for(7, size);
        let frame = codec::encode(7, 1.5, &payload);
        group.throughput(Throughput::Bytes(frame.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &payload, |b, payload| {
            b.iter(|| black_box(codec::encode(black_box(7), 1.5, payload)));
        });

        group.bench_with_input(BenchmarkId::new("decode", size), &frame, |b, frame| {
            b.iter(|| black_box(codec::decode(black_box(frame), size)));
        });
    }

    group.finish();
}

/// Benchmark receiver frame recovery on clean and damaged streams
fn benchmark_frame_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_sync");
    let payload_len = 700;
    let clean = stream_of(100, payload_len);
    group.throughput(Throughput::Bytes(clean.len() as u64));

    group.bench_function("clean_stream_whole", |b| {
        b.iter(|| {
            let mut sync = FrameSync::new(payload_len, 64);
            black_box(sync.push(&clean, 10.0));
        });
    });

    // Serial reads rarely line up with frames
    group.bench_function("clean_stream_small_reads", |b| {
        b.iter(|| {
            let mut sync = FrameSync::new(payload_len, 64);
            for chunk in clean.chunks(61) {
                black_box(sync.push(chunk, 10.0));
            }
        });
    });

    let mut damaged = clean.clone();
    let frame_len = codec::frame_len(payload_len);
    for n in [10usize, 40, 70] {
        damaged.remove(n * frame_len + 3);
    }
    group.bench_function("stream_with_lost_bytes", |b| {
        b.iter(|| {
            let mut sync = FrameSync::new(payload_len, 64);
            black_box(sync.push(&damaged, 10.0));
        });
    });

    group.finish();
}

/// Benchmark the shared accumulator and latency ring
fn benchmark_statistics(c: &mut Criterion) {
    let mut group = c.benchmark_group("statistics");

    group.bench_function("record_received", |b| {
        let stats = StatsAggregator::new();
        stats.mark_started();
        let mut sequence = 0u32;
        b.iter(|| {
            stats.record_received(PacketOutcome {
                sequence,
                frame_len: 744,
                corrupt: false,
                latency_ms: Some(12.5),
                clock_skew: false,
            });
            sequence = sequence.wrapping_add(1);
        });
    });

    group.bench_function("snapshot_full_window", |b| {
        let stats = StatsAggregator::new();
        stats.mark_started();
        for sequence in 0..1500 {
            stats.record_sent(744);
            stats.record_received(PacketOutcome {
                sequence,
                frame_len: 744,
                corrupt: sequence % 50 == 0,
                latency_ms: Some(f64::from(sequence % 40)),
                clock_skew: false,
            });
        }
        b.iter(|| black_box(stats.snapshot()));
    });

    group.bench_function("latency_window_push", |b| {
        let mut window = LatencyWindow::new();
        let mut value = 0.0;
        b.iter(|| {
            window.push(black_box(value));
            value += 0.25;
        });
    });

    group.finish();
}

/// Benchmark CLI parsing and sweep planning
fn benchmark_configuration(c: &mut Criterion) {
    let mut group = c.benchmark_group("configuration");

    group.bench_function("parse_cli_args", |b| {
        let args = [
            "lrt",
            "--transport",
            "loopback",
            "--sweep-sizes",
            "100:1000:100",
            "--sweep-intervals",
            "0.05,0.1,0.2",
            "--repeats",
            "3",
        ];
        b.iter(|| black_box(Cli::try_parse_from(black_box(args)).unwrap()));
    });

    group.bench_function("plan_points", |b| {
        let plan = SweepPlan::new((1..=20).map(|n| n * 50).collect(), vec![0.01, 0.02, 0.05, 0.1, 0.2])
            .with_repeats(3);
        b.iter(|| black_box(plan.points()));
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_codec,
    benchmark_frame_sync,
    benchmark_statistics,
    benchmark_configuration
);

criterion_main!(benches);
