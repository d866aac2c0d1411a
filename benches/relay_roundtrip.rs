//! Relay round-trip benchmark suite.
//!
//! Benchmarks provider calls through a loopback endpoint and an in-process
//! remote executor at different concurrency levels:
//! - Concurrent calls: 1, 16, 64
//!
//! Run with: cargo bench --bench relay_roundtrip
//! Results saved to: target/criterion/

use std::time::Duration;

use async_trait::async_trait;
use browser_wallet_relay::{Endpoint, Provider, RemoteExecutor, RemoteHandle, Wallet};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::{Value, json};
use tokio::runtime::Runtime;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const CONCURRENCY: &[usize] = &[1, 16, 64];

// ============================================================================
// Wallet
// ============================================================================

/// Wallet that answers instantly.
struct EchoWallet;

#[async_trait]
impl Wallet for EchoWallet {
    async fn request(&self, method: &str, params: Value) -> browser_wallet_relay::Result<Value> {
        match method {
            "eth_accounts" => Ok(json!(["0x0000000000000000000000000000000000000001"])),
            _ => Ok(params),
        }
    }
}

// ============================================================================
// Benchmark: Concurrent Round Trips
// ============================================================================

fn bench_roundtrip(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let (endpoint, provider, _remote) = rt.block_on(setup_relay());

    let mut group = c.benchmark_group("relay_roundtrip");
    group.measurement_time(Duration::from_secs(10));

    for &count in CONCURRENCY {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("calls", count), &count, |b, &count| {
            b.to_async(&rt)
                .iter(|| run_concurrent_calls(&provider, count));
        });
    }

    group.finish();
    rt.block_on(async {
        let _ = endpoint.stop().await;
    });
}

// ============================================================================
// Helper Functions
// ============================================================================

async fn setup_relay() -> (Endpoint, Provider, RemoteHandle) {
    let endpoint = Endpoint::builder()
        .port(0)
        .no_static_dir()
        .max_pending(1024)
        .build()
        .expect("endpoint");
    endpoint.start().await.expect("start");

    let ws_url = endpoint.ws_url().expect("listening");
    let remote = RemoteExecutor::new(&ws_url, EchoWallet)
        .expect("executor")
        .connect()
        .await
        .expect("connect");
    endpoint
        .wait_connected(Duration::from_secs(5))
        .await
        .expect("connected");

    let provider = endpoint.provider();
    (endpoint, provider, remote)
}

async fn run_concurrent_calls(provider: &Provider, count: usize) {
    let calls: Vec<_> = (0..count)
        .map(|i| provider.call("echo", json!([i])))
        .collect();

    for result in futures_util::future::join_all(calls).await {
        if let Err(e) = result {
            panic!("round trip failed: {e}");
        }
    }
}

// ============================================================================
// Criterion Setup
// ============================================================================

criterion_group!(benches, bench_roundtrip);
criterion_main!(benches);
