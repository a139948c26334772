//! Dispatch table benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use zmt_core::{DeviceConfig, SimulatedStack};
use zmt_protocol::{Frame, FrameType, Subsystem};
use zmt_server::{build_dispatch_table, CallbackMask, DispatchTable, FrameBuffer, MtConfig};

fn create_table() -> DispatchTable {
    let stack = SimulatedStack::new(&DeviceConfig::default());
    let mt = MtConfig::default();
    let mask = Arc::new(CallbackMask::new(&mt.callbacks));
    build_dispatch_table(stack, mask, &mt, None).unwrap()
}

fn sreq(subsystem: Subsystem, command_id: u8, payload: Vec<u8>) -> Frame {
    Frame::new(FrameType::SyncRequest, subsystem, command_id, payload)
}

fn bench_dispatch(c: &mut Criterion) {
    let table = create_table();
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    let cases = [
        ("sys_ping", sreq(Subsystem::Sys, 0x01, Vec::new())),
        ("util_device_info", sreq(Subsystem::Util, 0x00, Vec::new())),
        ("util_loopback_200", sreq(Subsystem::Util, 0x10, vec![0x55; 200])),
        ("mac_get_beacon_payload", sreq(Subsystem::Mac, 0x08, vec![0x45])),
        (
            "err_subsystem",
            Frame::with_raw_subsystem(FrameType::SyncRequest, 20, 0x00, Vec::new()),
        ),
        ("err_command_id", sreq(Subsystem::Zdo, 0x7E, Vec::new())),
    ];

    for (name, frame) in cases {
        group.bench_function(name, |b| {
            let mut sink = FrameBuffer::new();
            b.iter(|| {
                black_box(table.dispatch(&frame, &mut sink));
                black_box(sink.take())
            });
        });
    }

    group.finish();
}

fn bench_build_table(c: &mut Criterion) {
    c.bench_function("build_dispatch_table", |b| {
        b.iter(|| black_box(create_table()));
    });
}

criterion_group!(benches, bench_dispatch, bench_build_table);
criterion_main!(benches);
