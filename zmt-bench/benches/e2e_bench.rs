//! End-to-end client-bridge benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use zmt_client::{Client, ConnectionConfig};
use zmt_core::{DeviceConfig, SimulatedStack};
use zmt_server::{
    build_dispatch_table, CallbackForwarder, CallbackMask, MtConfig, Server, ServerConfig,
};

struct TestSetup {
    _server_handle: tokio::task::JoinHandle<()>,
    client: Client,
}

fn setup_bridge_and_client(rt: &Runtime) -> TestSetup {
    rt.block_on(async {
        let stack = SimulatedStack::new(&DeviceConfig::default());
        let mt = MtConfig::default();
        let mask = Arc::new(CallbackMask::new(&mt.callbacks));
        let table = build_dispatch_table(stack.clone(), mask.clone(), &mt, None).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Server::new(
            ServerConfig::new(addr),
            table,
            stack.event_sender(),
            CallbackForwarder::new(mask, None),
        );
        let server_handle = tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        let client = Client::new(ConnectionConfig::new(addr));
        client.connect().await.unwrap();
        let conn = client.connection();
        tokio::spawn(async move {
            let _ = conn.read_loop().await;
        });

        TestSetup {
            _server_handle: server_handle,
            client,
        }
    })
}

fn bench_ping_latency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_bridge_and_client(&rt);

    let mut group = c.benchmark_group("e2e_ping");
    group.throughput(Throughput::Elements(1));

    group.bench_function("ping", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(setup.client.ping().await.unwrap()) });
    });

    group.finish();
}

fn bench_loopback(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_bridge_and_client(&rt);

    let mut group = c.benchmark_group("e2e_loopback");

    for size in [1, 64, 250] {
        let data = vec![0x5A; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.to_async(&rt)
                .iter(|| async { black_box(setup.client.loopback(data).await.unwrap()) });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_ping_latency, bench_loopback);
criterion_main!(benches);
