//! Remote execution loop.
//!
//! Runs next to the wallet and executes the relay's `execute` envelopes.
//!
//! # States
//!
//! | State | Transition |
//! |-------|------------|
//! | `Idle` | wallet present → `CheckingAccess`, otherwise terminal |
//! | `CheckingAccess` | first account available → `Connected`, otherwise terminal |
//! | `Connected` | dispatch loop until the socket closes → `Closed` |
//!
//! Each `execute` runs on its own task, so a slow wallet prompt never
//! blocks other requests. Replies are serialised through a single writer.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Action, DISCONNECT_MESSAGE, Envelope, ExecutePayload, codec};

use super::log::DiagnosticLog;
use super::wallet::Wallet;

// ============================================================================
// Types
// ============================================================================

type RemoteStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// ExecutorState
// ============================================================================

/// Lifecycle of a [`RemoteExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// Not started, or stopped before checking access.
    Idle,
    /// Waiting for the wallet to grant account access.
    CheckingAccess,
    /// Connected to the relay and dispatching requests.
    Connected,
    /// The relay connection has ended.
    Closed,
}

// ============================================================================
// RemoteExecutor
// ============================================================================

/// Executes relayed requests against a [`Wallet`].
///
/// # Example
///
/// ```ignore
/// let executor = RemoteExecutor::new("ws://127.0.0.1:3333", my_wallet)?;
/// let handle = executor.connect().await?;
/// handle.closed().await?;
/// ```
pub struct RemoteExecutor {
    ws_url: Url,
    wallet: Arc<dyn Wallet>,
    log: Arc<DiagnosticLog>,
    state: Arc<Mutex<ExecutorState>>,
}

impl fmt::Debug for RemoteExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteExecutor")
            .field("ws_url", &self.ws_url.as_str())
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl RemoteExecutor {
    /// Creates an executor for the relay at `ws_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `ws_url` is not a `ws://` or `wss://` URL.
    pub fn new(ws_url: &str, wallet: impl Wallet + 'static) -> Result<Self> {
        Self::with_shared_wallet(ws_url, Arc::new(wallet))
    }

    /// Same as [`RemoteExecutor::new`] for a wallet that is already shared.
    ///
    /// # Errors
    ///
    /// See [`RemoteExecutor::new`].
    pub fn with_shared_wallet(ws_url: &str, wallet: Arc<dyn Wallet>) -> Result<Self> {
        let ws_url =
            Url::parse(ws_url).map_err(|e| Error::config(format!("invalid relay URL: {e}")))?;

        if !matches!(ws_url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "relay URL must use ws:// or wss://, got {}",
                ws_url.scheme()
            )));
        }

        Ok(Self {
            ws_url,
            wallet,
            log: Arc::new(DiagnosticLog::default()),
            state: Arc::new(Mutex::new(ExecutorState::Idle)),
        })
    }

    /// Replaces the diagnostic log.
    #[must_use]
    pub fn with_log(mut self, log: Arc<DiagnosticLog>) -> Self {
        self.log = log;
        self
    }

    /// Returns the diagnostic log.
    #[inline]
    #[must_use]
    pub fn log(&self) -> &Arc<DiagnosticLog> {
        &self.log
    }

    /// Returns where the executor is in its lifecycle.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ExecutorState {
        *self.state.lock()
    }

    /// Checks the wallet, connects to the relay and starts dispatching.
    ///
    /// # Errors
    ///
    /// - [`Error::WalletNotFound`] if no wallet is present
    /// - [`Error::WalletLocked`] if the wallet exposes no account
    /// - [`Error::WebSocket`] if the relay cannot be reached
    pub async fn connect(self) -> Result<RemoteHandle> {
        if !self.wallet.is_present() {
            self.log.push("Wallet not found!");
            return Err(Error::WalletNotFound);
        }

        self.set_state(ExecutorState::CheckingAccess);
        if !self.has_account().await {
            self.log
                .push("Please unlock your wallet first and then reload this page");
            self.set_state(ExecutorState::Idle);
            return Err(Error::WalletLocked);
        }

        let ws_stream = match connect_async(self.ws_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                self.log.push(format!("Could not reach relay: {e}"));
                self.set_state(ExecutorState::Idle);
                return Err(e.into());
            }
        };

        self.set_state(ExecutorState::Connected);
        self.log.push(format!("Connected to relay at {}", self.ws_url));

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Self::dispatch_loop(
            ws_stream,
            write_tx.clone(),
            write_rx,
            Arc::clone(&self.wallet),
            Arc::clone(&self.log),
            Arc::clone(&self.state),
        ));

        Ok(RemoteHandle {
            write_tx,
            state: self.state,
            log: self.log,
            task,
        })
    }

    /// Connects and dispatches until the relay connection ends.
    ///
    /// # Errors
    ///
    /// See [`RemoteExecutor::connect`].
    pub async fn run(self) -> Result<()> {
        self.connect().await?.closed().await
    }

    /// Returns `true` if the wallet grants access to at least one account.
    async fn has_account(&self) -> bool {
        if let Err(e) = self.wallet.enable().await {
            debug!(error = %e, "Wallet refused access");
            return false;
        }

        match self.wallet.request("eth_accounts", json!([])).await {
            Ok(accounts) => accounts
                .get(0)
                .and_then(Value::as_str)
                .is_some_and(|account| !account.is_empty()),
            Err(e) => {
                debug!(error = %e, "eth_accounts failed");
                false
            }
        }
    }

    fn set_state(&self, state: ExecutorState) {
        *self.state.lock() = state;
    }

    /// Reads envelopes and writes replies until the socket closes.
    async fn dispatch_loop(
        ws_stream: RemoteStream,
        write_tx: mpsc::UnboundedSender<Message>,
        mut write_rx: mpsc::UnboundedReceiver<Message>,
        wallet: Arc<dyn Wallet>,
        log: Arc<DiagnosticLog>,
        state: Arc<Mutex<ExecutorState>>,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_text(&text, &wallet, &write_tx, &log);
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            warn!(error = %e, "Relay socket error");
                            break;
                        }
                        _ => {}
                    }
                }

                outgoing = write_rx.recv() => {
                    let Some(outgoing) = outgoing else { break };
                    if let Err(e) = ws_write.send(outgoing).await {
                        warn!(error = %e, "Failed to write to relay");
                        break;
                    }
                }
            }
        }

        *state.lock() = ExecutorState::Closed;
        log.push("Relay connection closed");
    }

    /// Decodes one frame and spawns its execution.
    fn handle_text(
        text: &str,
        wallet: &Arc<dyn Wallet>,
        write_tx: &mpsc::UnboundedSender<Message>,
        log: &Arc<DiagnosticLog>,
    ) {
        let (action, request_id, payload) = match codec::route(text) {
            Ok(parts) => parts,
            Err(Error::ProtocolAction { payload }) => {
                warn!(%payload, "Relay reported a protocol error");
                return;
            }
            Err(e) => {
                debug!(error = %e, "Undecodable relay message");
                log.push("Could not parse websocket message. Is it a proper JSON command?");
                return;
            }
        };

        if action != Action::Execute {
            trace!(%request_id, %action, "Ignoring non-execute envelope");
            return;
        }

        let wallet = Arc::clone(wallet);
        let write_tx = write_tx.clone();
        let log = Arc::clone(log);

        tokio::spawn(async move {
            let result = Self::execute(wallet.as_ref(), request_id, payload, &log).await;

            match codec::encode(&Envelope::executed(request_id, result)) {
                Ok(text) => {
                    if write_tx.send(Message::Text(text.into())).is_err() {
                        debug!(%request_id, "Relay closed before reply was written");
                    }
                }
                Err(e) => warn!(%request_id, error = %e, "Failed to encode reply"),
            }
        });
    }

    /// Runs one request against the wallet.
    ///
    /// Failures become `{ "error": message }` so the relay can report them.
    async fn execute(
        wallet: &dyn Wallet,
        request_id: RequestId,
        payload: Value,
        log: &DiagnosticLog,
    ) -> Value {
        let ExecutePayload { method, params } = match serde_json::from_value(payload) {
            Ok(payload) => payload,
            Err(e) => return json!({ "error": format!("invalid execute payload: {e}") }),
        };

        log.push(format!("Request ID: {request_id}\nCalling {method}: {params}"));

        match wallet.request(&method, params).await {
            Ok(result) => result,
            Err(Error::Wallet { message }) => json!({ "error": message }),
            Err(e) => json!({ "error": e.to_string() }),
        }
    }
}

// ============================================================================
// RemoteHandle
// ============================================================================

/// Handle to a connected [`RemoteExecutor`].
pub struct RemoteHandle {
    write_tx: mpsc::UnboundedSender<Message>,
    state: Arc<Mutex<ExecutorState>>,
    log: Arc<DiagnosticLog>,
    task: JoinHandle<()>,
}

impl fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RemoteHandle {
    /// Returns the state of the running executor.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ExecutorState {
        *self.state.lock()
    }

    /// Returns the diagnostic log.
    #[inline]
    #[must_use]
    pub fn log(&self) -> &Arc<DiagnosticLog> {
        &self.log
    }

    /// Asks the relay to shut down, as a page does when it unloads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection already ended.
    pub fn disconnect(&self) -> Result<()> {
        self.write_tx
            .send(Message::Text(DISCONNECT_MESSAGE.into()))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Closes the socket without stopping the relay.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection already ended.
    pub fn close(&self) -> Result<()> {
        self.write_tx
            .send(Message::Close(None))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Waits until the relay connection ends.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the dispatch task panicked.
    pub async fn closed(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::connection(format!("dispatch task failed: {e}")))
    }
}

// ============================================================================
// Tests
// ============================================================================
