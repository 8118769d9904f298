use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use realm_core::core::{drain_frames, FieldType, FieldValue, Header, Message, Schema};
use realm_core::utils::PacketBufferPool;

fn schema() -> Schema {
    Schema::define(
        2,
        &[
            (FieldType::UInt32, 1),
            (FieldType::Pos, 1),
            (FieldType::Char, 32),
            (FieldType::MemoryBlock, 1),
            (FieldType::UInt16, 4),
        ],
    )
    .unwrap_or_else(|e| panic!("schema: {e}"))
}

#[allow(clippy::unwrap_used)]
fn bench_packet_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_encode_decode");
    let schema = schema();
    let block_sizes = [0usize, 64, 1024, 16 * 1024];

    for &size in &block_sizes {
        let block = vec![0xA5u8; size];
        let message = Message::new(&schema)
            .with(0, 7u32)
            .with(1, [1.0f32, 2.0, 3.0])
            .with(2, "player-one")
            .with(3, FieldValue::block(&block));
        let len = message.encoded_len().unwrap();
        group.throughput(Throughput::Bytes(len as u64));

        let pool = PacketBufferPool::with_capacity(2, len);
        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter(|| {
                let mut buf = pool.acquire();
                let bytes = buf.encode_top_level(&message, Header::new(1)).unwrap();
                black_box(bytes.len());
            })
        });

        let mut encoded = vec![0u8; len];
        message.encode_top_level(&mut encoded, Header::new(1)).unwrap();
        group.bench_function(format!("decode_{size}b"), |b| {
            b.iter(|| {
                let decoded = schema.decode_top_level(black_box(&encoded)).unwrap();
                black_box(decoded.block(3));
            })
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_sparse_presence(c: &mut Criterion) {
    let schema = schema();
    let message = Message::new(&schema).with(0, 1u32);
    let mut buf = [0u8; 64];
    c.bench_function("encode_single_field", |b| {
        b.iter(|| black_box(message.encode_top_level(&mut buf, Header::new(2)).unwrap()))
    });
}

#[allow(clippy::unwrap_used)]
fn bench_framing(c: &mut Criterion) {
    let schema = schema();
    let mut stream = Vec::new();
    for i in 0..256u32 {
        let message = Message::new(&schema).with(0, i).with(2, "frame");
        let mut buf = vec![0u8; message.encoded_len().unwrap()];
        message.encode_top_level(&mut buf, Header::new(1)).unwrap();
        stream.extend_from_slice(&buf);
    }

    let mut group = c.benchmark_group("framing");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("drain_256_frames", |b| {
        let mut frames = Vec::with_capacity(256);
        b.iter(|| {
            let mut src = BytesMut::from(&stream[..]);
            frames.clear();
            drain_frames(&mut src, &mut frames).unwrap();
            black_box(frames.len());
        })
    });
    group.finish();
}

criterion_group!(benches, bench_packet_encode_decode, bench_sparse_presence, bench_framing);
criterion_main!(benches);
