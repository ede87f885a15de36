// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_possible_truncation)]

//! Wire path benchmarks for topicwire
//!
//! Measures:
//! - Data frame encoding
//! - Parser throughput over a pre-built stream, with and without the topic cache
//! - Serialize-once broadcast to many sessions

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use topicwire::protocol::frame;
use topicwire::server::{Broadcaster, FanoutTarget};
use topicwire::{FrameHandler, ProtocolParser, RawCodec, Utf8Codec, WireConfig};

const TOPICS: [&str; 4] = ["prices", "orders", "news/eu", "news/us"];

/// Counts frames without looking at them.
#[derive(Default)]
struct Sink {
    messages: usize,
    bytes: usize,
}

impl FrameHandler<Vec<u8>> for Sink {
    fn on_message(&mut self, _topic: &str, message: Vec<u8>) {
        self.messages += 1;
        self.bytes += message.len();
    }
}

fn build_stream(frames: usize, payload: usize) -> Vec<u8> {
    let body = vec![0xA5u8; payload];
    let mut out = Vec::with_capacity(frames * (payload + 16));
    for i in 0..frames {
        frame::encode_message(&RawCodec, TOPICS[i % TOPICS.len()], &body, &mut out)
            .expect("encode");
    }
    out
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_data");
    for payload in [16usize, 256, 4096] {
        let body = vec![0u8; payload];
        let mut out = Vec::with_capacity(payload + 32);
        group.throughput(Throughput::Bytes(payload as u64));
        group.bench_with_input(BenchmarkId::from_parameter(payload), &body, |b, body| {
            b.iter(|| {
                out.clear();
                frame::encode_message(&RawCodec, "prices", black_box(body), &mut out)
                    .expect("encode");
                black_box(out.len())
            })
        });
    }
    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_stream");
    for (label, cached) in [("topic_cache", true), ("no_cache", false)] {
        let config = WireConfig::default().with_topic_cache(cached);
        for payload in [16usize, 1024] {
            let stream = build_stream(1000, payload);
            group.throughput(Throughput::Bytes(stream.len() as u64));
            group.bench_with_input(
                BenchmarkId::new(label, payload),
                &stream,
                |b, stream| {
                    b.iter(|| {
                        let mut parser = ProtocolParser::new(Arc::new(RawCodec), &config);
                        let mut sink = Sink::default();
                        let mut input = Cursor::new(stream.as_slice());
                        while let Ok(topicwire::protocol::ReadOutcome::Data(_)) =
                            parser.read_from(&mut input, &mut sink)
                        {}
                        assert_eq!(sink.messages, 1000);
                        black_box(sink.bytes)
                    })
                },
            );
        }
    }
    group.finish();
}

/// Session stand-in that only counts deliveries.
struct CountingTarget {
    subscribed: bool,
    frames: AtomicUsize,
}

impl FanoutTarget for CountingTarget {
    fn is_subscribed(&self, _topic: &str) -> bool {
        self.subscribed
    }

    fn deliver(&self, frame: &[u8]) -> bool {
        self.frames.fetch_add(1, Ordering::Relaxed);
        black_box(frame.len());
        true
    }
}

fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");
    for sessions in [1usize, 10, 100] {
        let targets: Vec<CountingTarget> = (0..sessions)
            .map(|i| CountingTarget {
                subscribed: i % 4 != 3,
                frames: AtomicUsize::new(0),
            })
            .collect();
        let mut broadcaster = Broadcaster::new();
        let message = "x".repeat(128);

        group.throughput(Throughput::Elements(sessions as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(sessions),
            &targets,
            |b, targets| {
                b.iter(|| {
                    broadcaster
                        .publish(&Utf8Codec, "prices", &message, targets.iter())
                        .expect("publish")
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_parse, bench_broadcast);
criterion_main!(benches);
