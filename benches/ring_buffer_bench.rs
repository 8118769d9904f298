use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use realm_core::utils::RingBuffer;

fn bench_write_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer");
    let chunk_sizes = [16usize, 256, 4096];

    for &size in &chunk_sizes {
        let chunk = vec![0x5Au8; size];
        let mut out = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("write_read_{size}b"), |b| {
            // Odd capacity keeps the cursors wrapping.
            let mut ring = RingBuffer::new(size * 3 + 7);
            b.iter(|| {
                ring.write(black_box(&chunk));
                black_box(ring.read(&mut out));
            })
        });
    }
    group.finish();
}

fn bench_consume_other(c: &mut Criterion) {
    let data = vec![1u8; 64 * 1024];
    c.bench_function("consume_other_64k", |b| {
        b.iter_batched(
            || {
                let mut src = RingBuffer::new(data.len());
                src.write(&data);
                (src, RingBuffer::new(data.len()))
            },
            |(mut src, mut dst)| black_box(dst.consume_other(&mut src)),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_write_read, bench_consume_other);
criterion_main!(benches);
