//! Relay routing and tab-lock throughput benchmarks.
//!
//! Adapted from the teacher's `message_routing` benchmark: same
//! `criterion`-with-a-shared-`tokio::Runtime` harness, retargeted from FIPA
//! message routing onto relay frame routing and per-tab lock acquisition.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::HashSet;
use std::time::Duration;
use tabrelay::coordination::tab_lock::{AcquireOutcome, TabLockTable, DEFAULT_MAX_HOLD};
use tabrelay::domain_types::{ClientType, TabId};
use tabrelay::relay::client::RelayClient;
use tabrelay::relay::config::RelayConfig;
use tabrelay::relay::domain_types::{Frame, FrameTarget, FrameType, IdentifyPayload};
use tabrelay::relay::server::RelayServerImpl;
use tabrelay::relay::traits::RelayRouter;
use tabrelay::time_provider::test_time_provider;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

/// Spins up a real relay server and one connected client, returning the
/// server handle (to call `route` against) and the client's assigned id.
async fn serving_pair() -> (RelayServerImpl, tabrelay::domain_types::ClientId, CancellationToken) {
    let server = RelayServerImpl::new(RelayConfig::testing(), test_time_provider());
    let listener = server.bind().await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let shutdown = CancellationToken::new();
    let server_for_task = server.clone();
    let shutdown_for_task = shutdown.clone();
    tokio::spawn(async move {
        let _ = server_for_task.serve(listener, shutdown_for_task).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let client = RelayClient::connect(
        port,
        IdentifyPayload {
            client_type: ClientType::ToolServer,
            name: "bench".to_string(),
            version: "0.0.0".to_string(),
            capabilities: HashSet::new(),
            pid: None,
        },
    )
    .await
    .unwrap();
    let client_id = client.id();
    // Leaked deliberately: the benchmark process is short-lived and the
    // socket must outlive the loop so routed frames have somewhere to land.
    std::mem::forget(client);

    (server, client_id, shutdown)
}

fn bench_frame_routing(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("frame_routing");
    group.measurement_time(Duration::from_secs(10));

    for payload_size in [64, 512, 4096, 32768].iter() {
        group.throughput(Throughput::Bytes(*payload_size as u64));

        group.bench_with_input(
            BenchmarkId::new("route_to_connected_client", payload_size),
            payload_size,
            |b, &payload_size| {
                let (server, client_id, _shutdown) = rt.block_on(serving_pair());
                b.to_async(&rt).iter(|| {
                    let server = server.clone();
                    async move {
                        let frame = Frame::new(
                            FrameType::Command,
                            None,
                            Some(FrameTarget::Client(client_id)),
                            serde_json::json!({"padding": "x".repeat(payload_size)}),
                        );
                        let result = server.route(frame).await;
                        black_box(result)
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_tab_lock_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("tab_lock_contention");
    group.measurement_time(Duration::from_secs(5));

    for waiter_count in [1, 10, 100].iter() {
        group.throughput(Throughput::Elements(*waiter_count as u64));

        group.bench_with_input(
            BenchmarkId::new("try_acquire_then_release", waiter_count),
            waiter_count,
            |b, &waiter_count| {
                b.iter(|| {
                    let table = TabLockTable::new(DEFAULT_MAX_HOLD, test_time_provider());
                    let tab = TabId::try_from("bench-tab".to_string()).unwrap();
                    let mut operations = Vec::with_capacity(waiter_count);
                    for i in 0..waiter_count {
                        let operation_id = format!("op_bench_0_{i}");
                        let outcome = table.try_acquire(&tab, &operation_id, 1_000);
                        black_box(&outcome);
                        if matches!(outcome, AcquireOutcome::Acquired) {
                            table.release(&tab, &operation_id);
                        }
                        operations.push(operation_id);
                    }
                    black_box(operations)
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_frame_routing, bench_tab_lock_contention);
criterion_main!(benches);
