//! Criterion benchmarks for the stream buffer hot path
//!
//! Run with: cargo bench -p corriente-core
#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use corriente_core::tag::TagStore;
use corriente_core::{BlockId, StreamBuffer, Tag, Value};

const CHUNK_SIZES: &[usize] = &[64, 256, 1024, 4096];

fn bench_ring_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("StreamBuffer");

    for &chunk in CHUNK_SIZES {
        group.bench_with_input(
            BenchmarkId::new("write_publish_consume", chunk),
            &chunk,
            |b, &chunk| {
                let buf = StreamBuffer::allocate(4, 8192).unwrap();
                let writer = buf.writer();
                let reader = buf.add_reader();
                let payload = vec![0x5Au8; chunk * 4];

                b.iter(|| {
                    let mut region = writer.write_region();
                    region.as_mut_slice()[..payload.len()].copy_from_slice(&payload);
                    drop(region);
                    writer.publish(chunk, Vec::new()).unwrap();

                    let region = reader.read_region();
                    black_box(region.as_slice());
                    drop(region);
                    reader.consume(chunk);
                });
            },
        );
    }

    // Wrap-around cost: chunks sized so every iteration straddles the
    // physical ring boundary.
    group.bench_function("wrapping_chunks", |b| {
        let buf = StreamBuffer::allocate(4, 96).unwrap();
        let writer = buf.writer();
        let reader = buf.add_reader();
        let payload = vec![0xA5u8; 64 * 4];

        b.iter(|| {
            let mut region = writer.write_region();
            region.as_mut_slice()[..payload.len()].copy_from_slice(&payload);
            drop(region);
            writer.publish(64, Vec::new()).unwrap();

            let region = reader.read_region();
            black_box(region.as_slice());
            drop(region);
            reader.consume(64);
        });
    });

    group.finish();
}

fn bench_tag_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("TagStore");

    group.bench_function("add_range_prune", |b| {
        let store = TagStore::new();
        let mut offset = 0u64;
        b.iter(|| {
            for k in 0..16 {
                store.add(Tag::new(
                    offset + k,
                    "bench",
                    Value::Int(k as i64),
                    BlockId::from_index(0),
                ));
            }
            black_box(store.range(offset, offset + 16));
            offset += 16;
            store.prune(offset);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_ring_throughput, bench_tag_store);
criterion_main!(benches);
