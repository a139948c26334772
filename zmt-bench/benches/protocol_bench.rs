//! Frame codec benchmarks.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use zmt_protocol::{Decoder, Frame, FrameType, PayloadReader, Subsystem};

fn test_frame(size: usize) -> Frame {
    Frame::new(FrameType::SyncRequest, Subsystem::Af, 0x01, vec![0xA5; size])
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [0, 32, 250] {
        let frame = test_frame(size);

        group.throughput(Throughput::Bytes(size as u64 + 3));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for size in [0, 32, 250] {
        let encoded = test_frame(size).encode().unwrap();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| black_box(Frame::decode(encoded).unwrap()));
        });
    }

    group.finish();
}

fn bench_stream_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_decode");

    // 100 frames arriving in 64-byte reads
    for size in [8, 64] {
        let mut stream = BytesMut::new();
        for _ in 0..100 {
            test_frame(size).encode_into(&mut stream).unwrap();
        }

        group.throughput(Throughput::Elements(100));
        group.bench_with_input(BenchmarkId::from_parameter(size), &stream, |b, stream| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                let mut count = 0;
                for chunk in stream.chunks(64) {
                    decoder.extend(chunk);
                    while let Some(frame) = decoder.decode_frame() {
                        black_box(&frame);
                        count += 1;
                    }
                }
                assert_eq!(count, 100);
            });
        });
    }

    group.finish();
}

fn bench_payload_reader(c: &mut Criterion) {
    // AF DATA_REQUEST layout with a 64-byte payload
    let mut payload = vec![0x00, 0x00, 0x01, 0x01, 0x06, 0x00, 0x11, 0x00, 0x1E, 64];
    payload.extend_from_slice(&[0x5A; 64]);

    c.bench_function("payload_reader_af_data_request", |b| {
        b.iter(|| {
            let mut r = PayloadReader::new(black_box(&payload));
            let dst = r.read_u16_le().unwrap();
            let dst_ep = r.read_u8().unwrap();
            let src_ep = r.read_u8().unwrap();
            let cluster = r.read_u16_le().unwrap();
            r.skip(3).unwrap();
            let len = r.read_u8().unwrap();
            let data = r.read_bytes(usize::from(len)).unwrap();
            black_box((dst, dst_ep, src_ep, cluster, data))
        });
    });
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_stream_decode,
    bench_payload_reader,
);
criterion_main!(benches);
