//! End-to-end relay tests.
//!
//! Each test runs a real [`Endpoint`] and a [`RemoteExecutor`] driving a
//! scripted in-memory wallet over a loopback WebSocket.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use browser_wallet_relay::{
    ConnectionState, Endpoint, Error, Eth, RemoteExecutor, RemoteHandle, RpcResponse, Wallet,
};
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Notify, oneshot};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// Fixtures
// ============================================================================

const ACCOUNT: &str = "0xAbC0000000000000000000000000000000000001";

const SIGNATURE: &str = "0x\
    1111111111111111111111111111111111111111111111111111111111111111\
    2222222222222222222222222222222222222222222222222222222222222222\
    1b";

/// Wallet answering a fixed set of methods.
#[derive(Default)]
struct ScriptedWallet {
    release: Arc<Notify>,
}

#[async_trait]
impl Wallet for ScriptedWallet {
    async fn request(&self, method: &str, params: Value) -> browser_wallet_relay::Result<Value> {
        match method {
            "eth_accounts" => Ok(json!([ACCOUNT])),
            "eth_chainId" => Ok(json!("0x1")),
            "echo" => Ok(params),
            "wait_for_release" => {
                self.release.notified().await;
                Ok(json!("released"))
            }
            "hang" => Ok(std::future::pending::<Value>().await),
            "personal_sign" | "eth_sign" | "eth_signTypedData_v4" => Ok(json!(SIGNATURE)),
            "eth_sendTransaction" => Ok(json!(format!(
                "0xhash-from-{}",
                params[0]["from"].as_str().unwrap_or_default()
            ))),
            "eth_getTransactionByHash" => Ok(json!({"gasPrice": "20000000000", "value": "0x0"})),
            _ => Err(Error::wallet("User rejected the request.")),
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn started_endpoint() -> anyhow::Result<Endpoint> {
    init_tracing();
    let endpoint = Endpoint::builder()
        .port(0)
        .no_static_dir()
        .request_timeout(Duration::from_secs(10))
        .build()?;
    endpoint.start().await?;
    Ok(endpoint)
}

async fn attach(endpoint: &Endpoint, wallet: ScriptedWallet) -> anyhow::Result<RemoteHandle> {
    let ws_url = endpoint.ws_url().ok_or_else(|| anyhow::anyhow!("not listening"))?;
    let handle = RemoteExecutor::new(&ws_url, wallet)?.connect().await?;
    endpoint.wait_connected(Duration::from_secs(5)).await?;
    Ok(handle)
}

async fn wait_until(condition: impl Fn() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn eth_accounts_reaches_callback_and_clears_pending() -> anyhow::Result<()> {
    let endpoint = started_endpoint().await?;
    let _remote = attach(&endpoint, ScriptedWallet::default()).await?;
    let provider = endpoint.provider();

    let (tx, rx) = oneshot::channel();
    provider
        .send(
            json!({"id": 1, "jsonrpc": "2.0", "method": "eth_accounts", "params": []}),
            move |result| {
                let _ = tx.send(result);
            },
        )
        .ok_or_else(|| anyhow::anyhow!("call was not registered"))?;

    let response = rx.await??;
    assert_eq!(response, RpcResponse::new(json!(1), json!([ACCOUNT])));
    assert_eq!(provider.pending_count(), 0);
    assert_eq!(endpoint.pending_count(), 0);

    endpoint.stop().await?;
    Ok(())
}

#[tokio::test]
async fn concurrent_replies_out_of_order_are_not_swapped() -> anyhow::Result<()> {
    let endpoint = started_endpoint().await?;
    let wallet = ScriptedWallet::default();
    let release = Arc::clone(&wallet.release);
    let _remote = attach(&endpoint, wallet).await?;
    let provider = endpoint.provider();

    let x = tokio::spawn({
        let provider = provider.clone();
        async move {
            provider
                .request(json!({"id": "x", "method": "wait_for_release", "params": []}))
                .await
        }
    });
    wait_until(|| endpoint.pending_count() == 1).await;

    let y = provider
        .request(json!({"id": "y", "method": "echo", "params": ["y"]}))
        .await?;
    assert_eq!(y.id, json!("y"));
    assert_eq!(y.result, json!(["y"]));
    assert!(!x.is_finished());

    release.notify_one();
    let x = x.await??;
    assert_eq!(x.id, json!("x"));
    assert_eq!(x.result, json!("released"));
    assert_eq!(provider.pending_count(), 0);

    endpoint.stop().await?;
    Ok(())
}

#[tokio::test]
async fn second_connection_is_closed_without_affecting_the_first() -> anyhow::Result<()> {
    let endpoint = started_endpoint().await?;
    let wallet = ScriptedWallet::default();
    let release = Arc::clone(&wallet.release);
    let _remote = attach(&endpoint, wallet).await?;
    let provider = endpoint.provider();

    let in_flight = tokio::spawn({
        let provider = provider.clone();
        async move {
            provider
                .request(json!({"id": 7, "method": "wait_for_release"}))
                .await
        }
    });
    wait_until(|| endpoint.pending_count() == 1).await;

    let ws_url = endpoint.ws_url().ok_or_else(|| anyhow::anyhow!("not listening"))?;
    let (mut intruder, _) = connect_async(ws_url).await?;
    match timeout(Duration::from_secs(5), intruder.next()).await? {
        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {}
        other => panic!("second connection should be closed, got {other:?}"),
    }

    assert_eq!(endpoint.state(), ConnectionState::Connected);
    assert_eq!(endpoint.pending_count(), 1);

    release.notify_one();
    let response = in_flight.await??;
    assert_eq!(response.result, json!("released"));

    endpoint.stop().await?;
    Ok(())
}

#[tokio::test]
async fn disconnect_mid_flight_resolves_pending_call_once() -> anyhow::Result<()> {
    let endpoint = started_endpoint().await?;
    let remote = attach(&endpoint, ScriptedWallet::default()).await?;
    let provider = endpoint.provider();

    let invocations = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = oneshot::channel();
    let counter = Arc::clone(&invocations);
    provider.send(json!({"id": 1, "method": "hang"}), move |result| {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(result);
    });
    wait_until(|| endpoint.pending_count() == 1).await;

    remote.disconnect()?;
    let result = rx.await?;
    assert!(matches!(result, Err(Error::ConnectionClosed)));

    // The disconnect message stops the whole endpoint.
    wait_until(|| endpoint.local_addr().is_none()).await;
    assert!(!endpoint.ready());
    assert_eq!(provider.pending_count(), 0);
    remote.closed().await?;

    // A later session must not resolve the stale call again.
    endpoint.start().await?;
    let _remote = attach(&endpoint, ScriptedWallet::default()).await?;
    let chain_id = provider.call("eth_chainId", json!([])).await?;
    assert_eq!(chain_id, json!("0x1"));

    sleep(Duration::from_millis(50)).await;
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    endpoint.stop().await?;
    Ok(())
}

#[tokio::test]
async fn send_while_not_connected_fails_synchronously() -> anyhow::Result<()> {
    let endpoint = started_endpoint().await?;
    let provider = endpoint.provider();

    let outcome = Arc::new(parking_lot::Mutex::new(None));
    let slot = Arc::clone(&outcome);
    let id = provider.send(json!({"id": 1, "method": "eth_accounts"}), move |result| {
        *slot.lock() = Some(result.map(|response| response.result));
    });

    assert!(id.is_none());
    assert!(matches!(*outcome.lock(), Some(Err(Error::NotConnected))));
    assert_eq!(provider.pending_count(), 0);
    assert_eq!(endpoint.pending_count(), 0);

    endpoint.stop().await?;
    Ok(())
}

#[tokio::test]
async fn wallet_rejection_surfaces_as_remote_error() -> anyhow::Result<()> {
    let endpoint = started_endpoint().await?;
    let _remote = attach(&endpoint, ScriptedWallet::default()).await?;

    let result = endpoint.provider().call("wallet_unknownMethod", json!([])).await;
    match result {
        Err(Error::RemoteExecution { message }) => {
            assert_eq!(message, "User rejected the request.");
        }
        other => panic!("expected a remote execution error, got {other:?}"),
    }

    endpoint.stop().await?;
    Ok(())
}

#[tokio::test]
async fn results_are_normalised() -> anyhow::Result<()> {
    let endpoint = started_endpoint().await?;
    let _remote = attach(&endpoint, ScriptedWallet::default()).await?;

    let tx = endpoint
        .provider()
        .call("eth_getTransactionByHash", json!(["0x1"]))
        .await?;
    assert_eq!(tx, json!({"gasPrice": 20_000_000_000_u64, "value": "0x0"}));

    endpoint.stop().await?;
    Ok(())
}

// ============================================================================
// Signing Facade
// ============================================================================

#[tokio::test]
async fn signing_facade_over_relay() -> anyhow::Result<()> {
    let endpoint = started_endpoint().await?;
    let _remote = attach(&endpoint, ScriptedWallet::default()).await?;
    let eth = Eth::new(endpoint.provider());

    let info = eth.get_address().await?;
    assert_eq!(info.address, ACCOUNT);
    assert!(info.public_key.is_empty());

    let signature = eth.sign_personal_message("68656c6c6f").await?;
    assert_eq!(signature.v, 27);
    assert_eq!(signature.r.len(), 64);
    assert_eq!(signature.s.len(), 64);

    let typed = json!({
        "domain": {"name": "Test", "chainId": 1},
        "types": {"Note": [{"name": "text", "type": "string"}]},
        "primaryType": "Note",
        "message": {"text": "hi"}
    });
    assert_eq!(eth.sign_typed_data(&typed).await?, signature);

    let hash = eth.send_transaction(json!({"to": ACCOUNT, "value": "0x0"})).await?;
    assert_eq!(hash, format!("0xhash-from-{ACCOUNT}"));

    endpoint.stop().await?;
    Ok(())
}

// ============================================================================
// Static Assets
// ============================================================================

async fn http_get(addr: std::net::SocketAddr, path: &str) -> anyhow::Result<String> {
    let mut stream = TcpStream::connect(addr).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    Ok(response)
}

#[tokio::test]
async fn serves_index_from_static_dir() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("index.html"), "<h1>custom page</h1>")?;

    let endpoint = Endpoint::builder().port(0).static_dir(dir.path()).build()?;
    endpoint.start().await?;
    let addr = endpoint.local_addr().ok_or_else(|| anyhow::anyhow!("not listening"))?;

    let response = http_get(addr, "/").await?;
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.ends_with("<h1>custom page</h1>"));

    endpoint.stop().await?;
    Ok(())
}

#[tokio::test]
async fn serves_assets_and_keeps_upgrade_path() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("app.js"), "console.log('relay');")?;

    let endpoint = Endpoint::builder().port(0).static_dir(dir.path()).build()?;
    endpoint.start().await?;
    let addr = endpoint.local_addr().ok_or_else(|| anyhow::anyhow!("not listening"))?;

    let script = http_get(addr, "/app.js").await?;
    assert!(script.starts_with("HTTP/1.1 200 OK"));
    assert!(script.contains("javascript"));
    assert!(script.ends_with("console.log('relay');"));

    // No index.html in the directory: the embedded page answers `/`.
    let index = http_get(addr, "/").await?;
    assert!(index.starts_with("HTTP/1.1 200 OK"));
    assert!(index.contains(&format!("ws://{addr}")));

    assert!(http_get(addr, "/missing.css").await?.starts_with("HTTP/1.1 404"));
    assert!(http_get(addr, "/../Cargo.toml").await?.starts_with("HTTP/1.1 4"));

    // The asset routes do not get in the way of the channel.
    let _remote = attach(&endpoint, ScriptedWallet::default()).await?;
    assert_eq!(endpoint.provider().call("eth_chainId", json!([])).await?, json!("0x1"));

    endpoint.stop().await?;
    Ok(())
}
