//! Room directory benchmarks for Chorus.
//!
//! These benchmarks measure membership churn and broadcast fan-out through
//! the shared directory, without network I/O.

use chorus_core::{ConnectionHandle, Mailbox, RoomDirectory, Silent};
use chorus_protocol::{codec, ServerMessage};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::Value;
use std::time::Instant;

fn audio_message() -> chorus_protocol::EncodedMessage {
    codec::encode(&ServerMessage::Audio {
        client_id: "speaker".into(),
        display_name: "speaker".into(),
        data: Value::String("A".repeat(256)),
        volume: 3.into(),
    })
    .unwrap()
}

fn populate(directory: &RoomDirectory, room: &str, size: usize) -> Vec<(ConnectionHandle, Mailbox)> {
    (0..size)
        .map(|i| {
            let (handle, mailbox) = ConnectionHandle::open(1024);
            let name = format!("member-{}", i);
            directory.join(&handle, room, &name, &name, &Silent).unwrap();
            (handle, mailbox)
        })
        .collect()
}

/// Benchmark join followed by leave on a fresh room.
fn bench_membership(c: &mut Criterion) {
    let mut group = c.benchmark_group("membership");

    group.bench_function("join_leave_new_room", |b| {
        let directory = RoomDirectory::new();
        let (handle, _mailbox) = ConnectionHandle::open(16);
        let mut i = 0u64;
        b.iter(|| {
            let room = format!("room-{}", i);
            directory.join(&handle, &room, "a", "a", &Silent).unwrap();
            directory.leave(black_box(handle.id()), &Silent);
            i += 1;
        });
    });

    group.bench_function("join_busy_room", |b| {
        let directory = RoomDirectory::new();
        let _members = populate(&directory, "busy", 64);
        let (handle, _mailbox) = ConnectionHandle::open(16);
        b.iter(|| {
            directory.join(&handle, "busy", "late", "late", &Silent).unwrap();
            directory.leave(black_box(handle.id()), &Silent);
        });
    });

    group.finish();
}

/// Benchmark broadcast fan-out, draining every mailbox each iteration.
fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");
    let message = audio_message();

    for size in [2usize, 10, 100] {
        group.throughput(Throughput::Elements(size as u64 - 1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_custom(|iters| {
                let directory = RoomDirectory::new();
                let mut members = populate(&directory, "bench", size);
                let speaker = members[0].0.id().clone();

                let start = Instant::now();
                for _ in 0..iters {
                    directory.broadcast("bench", black_box(&message), Some(&speaker));
                    for (_, mailbox) in &mut members {
                        while mailbox.try_recv().is_some() {}
                    }
                }
                start.elapsed()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_membership, bench_broadcast);
criterion_main!(benches);
