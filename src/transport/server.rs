//! WebSocket endpoint the browser page connects to.
//!
//! # Connection Flow
//!
//! 1. [`Endpoint::start`] binds `host:port` (default `127.0.0.1:3333`)
//! 2. The user opens `http://host:port/`; the page is served from the same
//!    listener
//! 3. The page upgrades to a WebSocket; the endpoint becomes Connected
//! 4. Requests flow through [`Endpoint::send`] until the page disconnects
//!
//! At most one channel is Connected at a time. A second upgrade while one
//! is Connecting or Connected is closed immediately after the handshake.
//!
//! # Routes
//!
//! | Path | Response |
//! |------|----------|
//! | `/`, `/index.html` | WebSocket upgrade, else `index.html` from the asset directory or the embedded page |
//! | anything else | File from the asset directory, `404` without one |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Action, Envelope};
use crate::provider::Provider;
use crate::relay::{RelayBuilder, RelayOptions, assets};

use super::connection::{CloseReason, Connection, Reply};

// ============================================================================
// Types
// ============================================================================

/// Side effect run each time a page connects.
pub type ConnectHook = Arc<dyn Fn() + Send + Sync>;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle of the single channel slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No page connected.
    Disconnected,
    /// A WebSocket handshake is in progress.
    Connecting,
    /// A page is connected.
    Connected,
}

// ============================================================================
// Internal State
// ============================================================================

/// The single channel slot.
struct Slot {
    state: ConnectionState,
    connection: Option<Connection>,
    /// Bumped on every transition out of Disconnected and on stop, so stale
    /// handshakes and close callbacks can recognise themselves.
    generation: u64,
}

/// A running HTTP server.
struct Listening {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Shared endpoint state.
pub(crate) struct EndpointInner {
    options: RelayOptions,
    on_connect: Option<ConnectHook>,
    slot: Mutex<Slot>,
    state_tx: watch::Sender<ConnectionState>,
    listening: Mutex<Option<Listening>>,
}

/// Router state. Weak so a running server does not keep the endpoint alive.
#[derive(Clone)]
struct RouterState {
    inner: Weak<EndpointInner>,
}

// ============================================================================
// Endpoint
// ============================================================================

/// Server side of the relay.
///
/// Cloning is cheap; clones share the listener and the channel slot.
///
/// # Example
///
/// ```no_run
/// use browser_wallet_relay::Endpoint;
///
/// # async fn example() -> browser_wallet_relay::Result<()> {
/// let endpoint = Endpoint::builder().port(0).build()?;
/// endpoint.start().await?;
/// println!("open {} in your browser", endpoint.http_url().unwrap_or_default());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("local_addr", &self.local_addr())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Endpoint - Constructor
// ============================================================================

impl Endpoint {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> RelayBuilder {
        RelayBuilder::new()
    }

    /// Creates an endpoint from validated options.
    pub(crate) fn new(options: RelayOptions, on_connect: Option<ConnectHook>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(EndpointInner {
                options,
                on_connect,
                slot: Mutex::new(Slot {
                    state: ConnectionState::Disconnected,
                    connection: None,
                    generation: 0,
                }),
                state_tx,
                listening: Mutex::new(None),
            }),
        }
    }
}

// ============================================================================
// Endpoint - Public API
// ============================================================================

impl Endpoint {
    /// Binds the listener and starts accepting connections.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the endpoint is already listening
    /// - [`Error::Io`] if binding fails
    pub async fn start(&self) -> Result<()> {
        if self.inner.listening.lock().is_some() {
            return Err(Error::config("endpoint already started"));
        }

        let listener = TcpListener::bind(self.inner.options.bind_addr()).await?;
        let local_addr = listener.local_addr()?;

        let mut listening = self.inner.listening.lock();
        if listening.is_some() {
            return Err(Error::config("endpoint already started"));
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        let task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "HTTP server failed");
            }
            debug!("HTTP server terminated");
        });

        *listening = Some(Listening {
            local_addr,
            shutdown_tx,
            task,
        });

        info!(%local_addr, "Relay endpoint listening");
        Ok(())
    }

    /// Returns `true` if a page is connected and its channel is writable.
    #[must_use]
    pub fn ready(&self) -> bool {
        let slot = self.inner.slot.lock();
        slot.state == ConnectionState::Connected
            && slot.connection.as_ref().is_some_and(Connection::is_open)
    }

    /// Returns the current slot state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.slot.lock().state
    }

    /// Returns the bound address while listening.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .listening
            .lock()
            .as_ref()
            .map(|listening| listening.local_addr)
    }

    /// Returns the WebSocket URL while listening.
    ///
    /// Format: `ws://{host}:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> Option<String> {
        self.local_addr().map(|addr| format!("ws://{addr}"))
    }

    /// Returns the URL of the wallet page while listening.
    ///
    /// Format: `http://{host}:{port}/`
    #[inline]
    #[must_use]
    pub fn http_url(&self) -> Option<String> {
        self.local_addr().map(|addr| format!("http://{addr}/"))
    }

    /// Returns the options this endpoint was built with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &RelayOptions {
        &self.inner.options
    }

    /// Returns the number of requests awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner
            .slot
            .lock()
            .connection
            .as_ref()
            .map_or(0, Connection::pending_count)
    }

    /// Drops the reply listener for `request_id` on the current channel.
    ///
    /// Returns `true` if one was registered. The reply, should it still
    /// arrive, is ignored.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        let connection = self.inner.slot.lock().connection.clone();
        connection.is_some_and(|connection| connection.cancel(request_id))
    }

    /// Creates a JSON-RPC provider backed by this endpoint.
    #[inline]
    #[must_use]
    pub fn provider(&self) -> Provider {
        Provider::new(self.clone())
    }

    /// Waits until a page is connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionTimeout`] if no page connects in time.
    pub async fn wait_connected(&self, limit: Duration) -> Result<()> {
        let mut state_rx = self.inner.state_tx.subscribe();

        let waited = timeout(limit, async {
            // Sender lives in `inner`, which `self` keeps alive.
            let _ = state_rx
                .wait_for(|state| *state == ConnectionState::Connected)
                .await;
        })
        .await;

        waited.map_err(|_| Error::connection_timeout(limit.as_millis() as u64))
    }

    /// Sends an envelope and waits for the reply carrying `required_action`
    /// and the same request id, bounded by the configured timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no page is connected
    /// - [`Error::RequestTimeout`] if no reply arrives in time
    /// - [`Error::ConnectionClosed`] if the channel closes first
    /// - [`Error::ProtocolAction`] if the page answers with an `error` envelope
    pub async fn send(
        &self,
        action: impl Into<Action>,
        request_id: RequestId,
        payload: Value,
        required_action: impl Into<Action>,
    ) -> Result<Reply> {
        self.send_with_timeout(
            action,
            request_id,
            payload,
            required_action,
            self.inner.options.request_timeout(),
        )
        .await
    }

    /// Same as [`Endpoint::send`] with an explicit timeout.
    ///
    /// `None` waits until a reply arrives or the channel closes.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::send`].
    pub async fn send_with_timeout(
        &self,
        action: impl Into<Action>,
        request_id: RequestId,
        payload: Value,
        required_action: impl Into<Action>,
        request_timeout: Option<Duration>,
    ) -> Result<Reply> {
        let connection = self.connected()?;
        let envelope = Envelope::new(action, request_id, payload);

        connection
            .send(envelope, required_action.into(), request_timeout)
            .await
    }

    /// Closes the channel, then the listener.
    ///
    /// Resolves once both are closed. Safe to call when nothing is open.
    pub async fn stop(&self) -> Result<()> {
        let connection = {
            let mut slot = self.inner.slot.lock();
            slot.state = ConnectionState::Disconnected;
            slot.generation += 1;
            slot.connection.take()
        };
        self.publish_state(ConnectionState::Disconnected);

        if let Some(connection) = connection {
            connection.close().await;
            debug!("Channel closed");
        }

        let listening = self.inner.listening.lock().take();
        if let Some(listening) = listening {
            let _ = listening.shutdown_tx.send(());
            if let Err(e) = listening.task.await {
                warn!(error = %e, "HTTP server did not shut down cleanly");
            }
            info!(local_addr = %listening.local_addr, "Relay endpoint stopped");
        }

        Ok(())
    }
}

// ============================================================================
// Endpoint - Router
// ============================================================================

impl Endpoint {
    /// Builds the routes served on the listener.
    fn router(&self) -> Router {
        let state = RouterState {
            inner: Arc::downgrade(&self.inner),
        };

        let mut router = Router::new()
            .route("/", get(Self::serve_root))
            .route("/index.html", get(Self::serve_root));

        if let Some(dir) = &self.inner.options.static_dir {
            router = router.fallback_service(ServeDir::new(dir));
        }

        router.with_state(state)
    }

    /// Upgrades to the channel or serves the wallet page.
    async fn serve_root(
        State(state): State<RouterState>,
        ConnectInfo(addr): ConnectInfo<SocketAddr>,
        upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    ) -> Response {
        let Some(inner) = state.inner.upgrade() else {
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        };
        let endpoint = Self { inner };

        match upgrade {
            Ok(ws) => endpoint.upgrade(ws, addr),
            Err(_) => endpoint.serve_index().await,
        }
    }

    /// Serves `index.html` from the asset directory, or the embedded page.
    async fn serve_index(&self) -> Response {
        let page = match self.read_static_index().await {
            Some(contents) => contents,
            None => assets::render_client_page(&self.ws_url().unwrap_or_default()),
        };

        ([(header::CACHE_CONTROL, "no-store")], Html(page)).into_response()
    }

    async fn read_static_index(&self) -> Option<String> {
        let path = self.inner.options.static_dir.as_ref()?.join("index.html");

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Some(contents),
            Err(e) => {
                trace!(path = %path.display(), error = %e, "No index.html in asset directory");
                None
            }
        }
    }
}

// ============================================================================
// Endpoint - Channel Slot
// ============================================================================

impl Endpoint {
    /// Claims the slot for an upgrade, or closes the socket if it is taken.
    fn upgrade(&self, ws: WebSocketUpgrade, addr: SocketAddr) -> Response {
        let generation = {
            let mut slot = self.inner.slot.lock();
            if slot.state != ConnectionState::Disconnected {
                None
            } else {
                slot.state = ConnectionState::Connecting;
                slot.generation += 1;
                Some(slot.generation)
            }
        };

        let Some(generation) = generation else {
            warn!(%addr, error = %Error::ConnectionRejected, "Rejecting second connection");
            return ws.on_upgrade(|mut socket| async move {
                let _ = socket.send(Message::Close(None)).await;
            });
        };
        self.publish_state(ConnectionState::Connecting);

        let failed = self.clone();
        let endpoint = self.clone();
        ws.on_failed_upgrade(move |e| {
            failed.reset_if_current(generation);
            warn!(%addr, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            endpoint.admit(socket, addr, generation).await;
        })
    }

    /// Installs an upgraded socket as the Connected channel.
    async fn admit(&self, socket: WebSocket, addr: SocketAddr, generation: u64) {
        let weak = Arc::downgrade(&self.inner);
        let connection = Connection::new(
            socket,
            self.inner.options.max_pending,
            Box::new(move |reason| Self::on_connection_closed(&weak, generation, reason)),
        );

        let admitted = {
            let mut slot = self.inner.slot.lock();
            if slot.generation == generation && slot.state == ConnectionState::Connecting {
                slot.state = ConnectionState::Connected;
                slot.connection = Some(connection.clone());
                true
            } else {
                false
            }
        };

        if !admitted {
            debug!(%addr, "Endpoint stopped during handshake");
            connection.close().await;
            return;
        }

        self.publish_state(ConnectionState::Connected);
        info!(%addr, "Wallet page connected");

        if let Some(hook) = &self.inner.on_connect {
            hook();
        }
    }

    /// Frees the slot when the current channel's event loop ends.
    fn on_connection_closed(inner: &Weak<EndpointInner>, generation: u64, reason: CloseReason) {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let endpoint = Self { inner };

        endpoint.reset_if_current(generation);
        info!(?reason, "Wallet page disconnected");

        if reason == CloseReason::DisconnectRequested {
            // `stop` waits on the listener task, so run it off this task.
            tokio::spawn(async move {
                if let Err(e) = endpoint.stop().await {
                    warn!(error = %e, "Stop after disconnect failed");
                }
            });
        }
    }

    /// Returns the slot to Disconnected if it still belongs to `generation`.
    fn reset_if_current(&self, generation: u64) {
        let reset = {
            let mut slot = self.inner.slot.lock();
            if slot.generation == generation {
                slot.state = ConnectionState::Disconnected;
                slot.connection = None;
                true
            } else {
                false
            }
        };

        if reset {
            self.publish_state(ConnectionState::Disconnected);
        }
    }

    /// Returns the connected channel.
    fn connected(&self) -> Result<Connection> {
        let slot = self.inner.slot.lock();
        match (&slot.state, &slot.connection) {
            (ConnectionState::Connected, Some(connection)) if connection.is_open() => {
                Ok(connection.clone())
            }
            _ => Err(Error::NotConnected),
        }
    }

    /// Publishes a state change to `wait_connected` observers.
    fn publish_state(&self, state: ConnectionState) {
        self.inner.state_tx.send_replace(state);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

    use crate::protocol::codec;

    type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// Plain HTTP/1.1 GET; the server closes after answering.
    async fn http_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.expect("write");

        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("read");
        response
    }

    async fn started() -> Endpoint {
        let endpoint = Endpoint::builder()
            .port(0)
            .no_static_dir()
            .build()
            .expect("build");
        endpoint.start().await.expect("start");
        endpoint
    }

    async fn connect(endpoint: &Endpoint) -> ClientStream {
        let url = endpoint.ws_url().expect("listening");
        let (stream, _) = connect_async(url).await.expect("connect");
        endpoint
            .wait_connected(Duration::from_secs(5))
            .await
            .expect("connected");
        stream
    }

    #[tokio::test]
    async fn test_start_binds_and_reports_urls() {
        let endpoint = started().await;
        let addr = endpoint.local_addr().expect("addr");
        assert!(addr.port() > 0);
        assert_eq!(endpoint.ws_url(), Some(format!("ws://{addr}")));
        assert_eq!(endpoint.http_url(), Some(format!("http://{addr}/")));
        assert_eq!(endpoint.state(), ConnectionState::Disconnected);
        assert!(!endpoint.ready());
        endpoint.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let endpoint = started().await;
        assert!(matches!(endpoint.start().await, Err(Error::Config { .. })));
        endpoint.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_stop_without_start_is_safe() {
        let endpoint = Endpoint::builder().port(0).build().expect("build");
        endpoint.stop().await.expect("stop");
        endpoint.stop().await.expect("stop twice");
        assert!(endpoint.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_send_while_disconnected() {
        let endpoint = started().await;
        let result = endpoint
            .send("execute", RequestId::generate(), json!({}), "executed")
            .await;
        assert!(matches!(result, Err(Error::NotConnected)));
        endpoint.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_on_connect_hook_runs() {
        let count = Arc::new(AtomicUsize::new(0));
        let hook_count = Arc::clone(&count);
        let endpoint = Endpoint::builder()
            .port(0)
            .no_static_dir()
            .on_connect(move || {
                hook_count.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .expect("build");
        endpoint.start().await.expect("start");

        let _client = connect(&endpoint).await;
        assert!(endpoint.ready());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        endpoint.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_second_connection_is_closed() {
        let endpoint = started().await;
        let mut first = connect(&endpoint).await;

        let url = endpoint.ws_url().expect("listening");
        let (mut second, _) = connect_async(url).await.expect("handshake completes");
        match second.next().await {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {}
            other => panic!("second connection should be closed, got {other:?}"),
        }

        assert!(endpoint.ready());
        assert_eq!(endpoint.state(), ConnectionState::Connected);

        // The first channel still works.
        let request_id = RequestId::generate();
        let pending = {
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                endpoint
                    .send("execute", request_id, json!({"method": "eth_chainId"}), "executed")
                    .await
            })
        };
        let Some(Ok(Message::Text(text))) = first.next().await else {
            panic!("expected execute envelope");
        };
        let envelope = codec::decode(&text).expect("decode");
        let answer = codec::encode(&Envelope::executed(envelope.request_id, json!("0x1")))
            .expect("encode");
        first.send(Message::Text(answer.into())).await.expect("send");

        let reply = pending.await.expect("join").expect("reply");
        assert_eq!(reply.request_id, request_id);
        assert_eq!(reply.result, json!("0x1"));
        endpoint.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_remote_close_frees_slot() {
        let endpoint = started().await;
        let mut client = connect(&endpoint).await;
        client.close(None).await.expect("close");

        let mut state_rx = endpoint.inner.state_tx.subscribe();
        timeout(
            Duration::from_secs(5),
            state_rx.wait_for(|state| *state == ConnectionState::Disconnected),
        )
        .await
        .expect("disconnect observed")
        .expect("sender alive");
        assert!(!endpoint.ready());
        assert!(endpoint.local_addr().is_some());

        // A new page may connect afterwards.
        let _client = connect(&endpoint).await;
        assert!(endpoint.ready());
        endpoint.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_disconnect_message_stops_endpoint() {
        let endpoint = started().await;
        let mut client = connect(&endpoint).await;
        client
            .send(Message::Text("disconnect".into()))
            .await
            .expect("send");

        timeout(Duration::from_secs(5), async {
            while endpoint.local_addr().is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("endpoint stopped");
        assert!(!endpoint.ready());
    }

    #[tokio::test]
    async fn test_wait_connected_times_out() {
        let endpoint = started().await;
        let result = endpoint.wait_connected(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(Error::ConnectionTimeout { .. })));
        endpoint.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_serves_embedded_page() {
        let endpoint = started().await;
        let addr = endpoint.local_addr().expect("addr");

        let response = http_get(addr, "/").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("cache-control: no-store"));
        assert!(response.contains(&format!("ws://{addr}")));

        let missing = http_get(addr, "/app.js").await;
        assert!(missing.starts_with("HTTP/1.1 404"));
        endpoint.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_cancel_drops_listener() {
        let endpoint = started().await;
        let mut client = connect(&endpoint).await;
        let request_id = RequestId::generate();

        let pending = {
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                endpoint
                    .send_with_timeout("execute", request_id, json!({}), "executed", None)
                    .await
            })
        };
        let Some(Ok(Message::Text(_))) = client.next().await else {
            panic!("expected execute envelope");
        };
        assert_eq!(endpoint.pending_count(), 1);

        assert!(endpoint.cancel(request_id));
        assert_eq!(endpoint.pending_count(), 0);
        assert!(matches!(pending.await.expect("join"), Err(Error::ConnectionClosed)));
        assert!(!endpoint.cancel(request_id));
        endpoint.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_cancel_while_disconnected() {
        let endpoint = started().await;
        assert!(!endpoint.cancel(RequestId::generate()));
        endpoint.stop().await.expect("stop");
    }
}
