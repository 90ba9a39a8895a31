//! Benchmarks for data processing operations
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use eegbridge_rs::backend::{PacketDecoder, SampleRing};
use eegbridge_rs::{MarkerEvent, SessionTable, NO_EVENT};

const CHANNELS: [&str; 5] = ["TP9", "AF7", "AF8", "TP10", "Right AUX"];
const RATE: f64 = 256.0;

fn session_table(rows: usize) -> SessionTable {
    let mut table = SessionTable::new(CHANNELS.iter().map(|c| c.to_string()).collect());
    for i in 0..rows {
        let t = i as f64 / RATE;
        table.push_row(
            1_700_000_000.0 + t,
            (0..CHANNELS.len())
                .map(|ch| (t * (10.0 + ch as f64)).sin() * 50.0)
                .collect(),
            NO_EVENT,
        );
    }
    table
}

/// One marker per second, alternating target and non-target
fn markers(rows: usize) -> Vec<MarkerEvent> {
    (0..rows / RATE as usize)
        .map(|s| MarkerEvent::new(1 + (s % 2) as i32, 1_700_000_000.0 + s as f64 + 0.3))
        .collect()
}

/// Well-framed Cyton packets with a counting sample number
fn cyton_stream(packets: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(packets * 33);
    for i in 0..packets {
        bytes.push(0xA0);
        bytes.push(i as u8);
        for ch in 0..8u32 {
            let count = (i as u32 * 31 + ch * 1000) & 0x7F_FFFF;
            bytes.extend_from_slice(&count.to_be_bytes()[1..]);
        }
        bytes.extend_from_slice(&[0; 6]);
        bytes.push(0xC0);
    }
    bytes
}

fn bench_sample_ring(c: &mut Criterion) {
    let mut group = c.benchmark_group("sample_ring");

    for capacity in [1000, 45_000, 450_000].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("push", capacity), capacity, |b, &capacity| {
            let mut ring = SampleRing::new(11, capacity);
            let mut i = 0u64;
            b.iter(|| {
                ring.push(black_box(vec![i as f64; 11]));
                i = i.wrapping_add(1);
            });
        });
    }

    let mut ring = SampleRing::new(11, 45_000);
    for i in 0..45_000 {
        ring.push(vec![i as f64; 11]);
    }
    for n in [256, 2560, 45_000].iter() {
        group.throughput(Throughput::Elements(*n as u64));
        group.bench_with_input(BenchmarkId::new("latest", n), n, |b, &n| {
            b.iter(|| black_box(ring.latest(n)));
        });
    }

    group.finish();
}

fn bench_marker_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("marker_merge");

    for rows in [2560, 25_600, 256_000].iter() {
        let table = session_table(*rows);
        let marks = markers(*rows);
        group.throughput(Throughput::Elements(marks.len() as u64));
        group.bench_with_input(BenchmarkId::new("merge", rows), &table, |b, table| {
            b.iter_batched(
                || table.clone(),
                |mut table| black_box(table.merge_markers(&marks)),
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_csv_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("csv_write");
    group.sample_size(20);
    let dir = tempfile::tempdir().expect("temp dir");

    for rows in [2560, 25_600].iter() {
        let table = session_table(*rows);
        let path = dir.path().join(format!("bench_{}.csv", rows));
        group.throughput(Throughput::Elements(*rows as u64));
        group.bench_with_input(BenchmarkId::new("write", rows), &table, |b, table| {
            b.iter(|| table.write_csv(black_box(&path)).expect("write"));
        });
    }

    group.finish();
}

fn bench_packet_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("cyton_decode");

    let clean = cyton_stream(1000);
    let mut noisy = vec![0x55; 7];
    noisy.extend_from_slice(&clean);

    group.throughput(Throughput::Bytes(clean.len() as u64));
    group.bench_function("aligned", |b| {
        b.iter(|| black_box(PacketDecoder::new().feed(&clean)));
    });
    group.bench_function("resync", |b| {
        b.iter(|| black_box(PacketDecoder::new().feed(&noisy)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_sample_ring,
    bench_marker_merge,
    bench_csv_write,
    bench_packet_decode,
);

criterion_main!(benches);
