//! Codec benchmarks for chorus-protocol.

use chorus_protocol::{codec, ServerMessage};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::Value;

fn audio_frame(size: usize) -> String {
    format!(
        r#"{{"type":"audio","data":"{}","volume":3}}"#,
        "A".repeat(size)
    )
}

fn bench_decode_audio(c: &mut Criterion) {
    let frame = audio_frame(1024);

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("audio_1KiB", |b| {
        b.iter(|| codec::decode_text(black_box(&frame)))
    });
    group.finish();
}

fn bench_encode_relay(c: &mut Criterion) {
    let message = ServerMessage::Audio {
        client_id: "client-1".into(),
        display_name: "Client One".into(),
        data: Value::String("A".repeat(1024)),
        volume: 3.into(),
    };

    let mut group = c.benchmark_group("encode");
    group.bench_function("audio_1KiB", |b| b.iter(|| codec::encode(black_box(&message))));
    group.finish();
}

fn bench_encode_presence(c: &mut Criterion) {
    let members: Vec<String> = (0..32).map(|i| format!("member-{}", i)).collect();
    let message = ServerMessage::UserJoined {
        client_id: "member-31".into(),
        display_name: "member-31".into(),
        member_count: members.len(),
        members,
    };

    c.bench_function("encode_user_joined_32", |b| {
        b.iter(|| codec::encode(black_box(&message)))
    });
}

criterion_group!(
    benches,
    bench_decode_audio,
    bench_encode_relay,
    bench_encode_presence
);
criterion_main!(benches);
