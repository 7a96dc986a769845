//! Criterion benchmark untuk cursor dan envelope decoder
//!
//! Run dengan: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use hydra::core::ByteCursor;
use hydra::protocol::{ArgsReader, Encoder, EnvelopeDecoder, Value};

fn bench_cursor(c: &mut Criterion) {
    let mut group = c.benchmark_group("byte_cursor");
    let data = vec![0xABu8; 4096];

    // Fast path: every take served from the current read
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("take_borrowed_4k", |b| {
        let mut cursor = ByteCursor::new();
        b.iter(|| {
            let mut feed = cursor.feed(black_box(&data));
            while let Ok(taken) = feed.take(16) {
                black_box(&taken[..]);
            }
        });
    });

    // Every 16-byte span straddles two reads
    group.bench_function("take_split_4k", |b| {
        let mut cursor = ByteCursor::new();
        b.iter(|| {
            for chunk in data.chunks(24) {
                let mut feed = cursor.feed(black_box(chunk));
                while let Ok(taken) = feed.take(16) {
                    black_box(&taken[..]);
                }
            }
            cursor.clear();
        });
    });

    group.finish();
}

fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");
    let mut encoder = Encoder::new(256);
    let request = encoder
        .encode_call("getUserProfile", 7, &[(1, Value::I64(99)), (2, Value::from("en-US"))])
        .to_vec();
    group.throughput(Throughput::Elements(1));

    group.bench_function("single_read", |b| {
        let mut cursor = ByteCursor::new();
        let mut decoder = EnvelopeDecoder::new(true, 1024);
        let mut args = ArgsReader::new(16, 1 << 20);
        b.iter(|| {
            let mut feed = cursor.feed(black_box(&request));
            let envelope = decoder.resume(&mut feed);
            let raw = args.resume(&mut feed);
            black_box((envelope, raw))
        });
    });

    for chunk in [1usize, 3, 7] {
        group.bench_function(format!("fragmented_{chunk}"), |b| {
            let mut cursor = ByteCursor::new();
            let mut decoder = EnvelopeDecoder::new(true, 1024);
            let mut args = ArgsReader::new(16, 1 << 20);
            b.iter(|| {
                let mut envelope = None;
                let mut raw = None;
                for piece in request.chunks(chunk) {
                    let mut feed = cursor.feed(piece);
                    if envelope.is_none() {
                        envelope = decoder.resume(&mut feed).ok().flatten();
                    }
                    if envelope.is_some() && raw.is_none() {
                        raw = args.resume(&mut feed).ok().flatten();
                    }
                }
                black_box((envelope, raw))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cursor, bench_envelope);
criterion_main!(benches);
