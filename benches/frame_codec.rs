//! Frame codec benchmark suite.
//!
//! Measures STOMP frame encoding and streaming decoding, with and without
//! the SockJS envelope:
//! - Body sizes: 64 B, 1 KiB, 16 KiB
//! - Chunking: whole frames and 512 B fragments
//!
//! Run with: cargo bench --bench frame_codec
//! Results saved to: target/criterion/

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use stomp_relay::protocol::{Command, Frame, FrameDecoder};
use stomp_relay::transport::sockjs;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const BODY_SIZES: &[usize] = &[64, 1024, 16 * 1024];
const FRAGMENT: usize = 512;

fn price_frame(body_size: usize) -> Frame {
    let body = format!(
        r#"{{"symbol":"BTC","newPrice":"64000.50","pad":"{}"}}"#,
        "x".repeat(body_size)
    );
    Frame::new(Command::Message)
        .header("subscription", "sub-1")
        .header("message-id", "42")
        .header("destination", "/topic/prices")
        .header("content-type", "application/json")
        .body(body)
}

// ============================================================================
// Benchmark: Encode
// ============================================================================

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for &size in BODY_SIZES {
        let frame = price_frame(size);
        group.throughput(Throughput::Bytes(frame.encode().len() as u64));
        group.bench_with_input(BenchmarkId::new("stomp", size), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode()));
        });
        group.bench_with_input(BenchmarkId::new("sockjs", size), &frame, |b, frame| {
            b.iter(|| black_box(sockjs::encode(&frame.encode()).unwrap()));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Decode
// ============================================================================

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for &size in BODY_SIZES {
        let wire = price_frame(size).encode();
        group.throughput(Throughput::Bytes(wire.len() as u64));

        group.bench_with_input(BenchmarkId::new("whole", size), &wire, |b, wire| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new();
                black_box(decoder.push(wire).items)
            });
        });

        let fragments: Vec<String> = wire
            .as_bytes()
            .chunks(FRAGMENT)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect();
        group.bench_with_input(
            BenchmarkId::new("fragmented", size),
            &fragments,
            |b, fragments| {
                b.iter(|| {
                    let mut decoder = FrameDecoder::new();
                    let mut frames = 0;
                    for fragment in fragments {
                        frames += decoder.push(fragment).items.len();
                    }
                    black_box(frames)
                });
            },
        );

        let envelope = sockjs::encode(&wire).unwrap();
        group.bench_with_input(BenchmarkId::new("sockjs", size), &envelope, |b, envelope| {
            b.iter(|| black_box(sockjs::decode(&format!("a{envelope}")).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
