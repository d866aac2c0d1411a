//! WebSocket connection and event loop.
//!
//! This module handles one accepted browser channel, including
//! request/reply correlation and the `"disconnect"` control message.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming envelopes from the page (replies, error envelopes)
//! - Outgoing envelopes from the Rust API
//! - One-shot reply listeners keyed by request id
//! - Failing every outstanding listener when the channel goes away

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Action, Envelope, codec};

// ============================================================================
// Types
// ============================================================================

/// A reply listener waiting for one specific envelope.
struct Listener {
    /// Action the reply must carry to resolve this listener.
    required_action: Action,
    /// Resolves the waiting `send`.
    reply_tx: oneshot::Sender<Result<Reply>>,
}

/// Map of request IDs to reply listeners.
type ListenerMap = FxHashMap<RequestId, Listener>;

/// Callback invoked once when the event loop terminates.
pub(crate) type CloseHandler = Box<dyn FnOnce(CloseReason) + Send>;

// ============================================================================
// Reply
// ============================================================================

/// A correlated reply to an envelope sent through [`Connection::send`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Request id echoed by the page.
    pub request_id: RequestId,
    /// Reply payload, untouched.
    pub result: Value,
}

// ============================================================================
// CloseReason
// ============================================================================

/// Why a connection's event loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The page sent the `"disconnect"` control message.
    DisconnectRequested,
    /// The page closed the socket or the stream ended.
    RemoteClosed,
    /// Local shutdown through [`Connection::close`].
    Shutdown,
    /// WebSocket transport error.
    Failed,
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write an envelope and register a reply listener.
    Send {
        envelope: Envelope,
        required_action: Action,
        reply_tx: oneshot::Sender<Result<Reply>>,
    },
    /// Remove a timed-out or cancelled listener.
    RemoveListener(RequestId),
    /// Close the socket.
    Shutdown,
}

// ============================================================================
// ListenerGuard
// ============================================================================

/// Cancels a listener unless disarmed once its reply has been taken.
struct ListenerGuard<'a> {
    connection: &'a Connection,
    request_id: RequestId,
}

impl ListenerGuard<'_> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        self.connection.cancel(self.request_id);
    }
}

// ============================================================================
// Connection
// ============================================================================

/// WebSocket connection to the page holding the wallet.
///
/// Cloning is cheap; all clones drive the same event loop.
#[derive(Clone)]
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Reply listeners (shared with event loop).
    listeners: Arc<Mutex<ListenerMap>>,
    /// Flips to `true` once the event loop has finished.
    closed_rx: watch::Receiver<bool>,
    /// Maximum outstanding listeners.
    max_pending: usize,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("pending", &self.pending_count())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a new connection from an upgraded WebSocket.
    ///
    /// Spawns the event loop task internally. `on_close` runs once, after
    /// every outstanding listener has been failed.
    pub(crate) fn new(
        ws_stream: WebSocket,
        max_pending: usize,
        on_close: CloseHandler,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let listeners = Arc::new(Mutex::new(ListenerMap::default()));

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&listeners),
            closed_tx,
            on_close,
        ));

        Self {
            command_tx,
            listeners,
            closed_rx,
            max_pending,
        }
    }

    /// Returns `true` while the event loop is running.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.command_tx.is_closed() && !*self.closed_rx.borrow()
    }

    /// Returns the number of outstanding reply listeners.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Writes an envelope and waits for the reply carrying `required_action`
    /// and the same request id.
    ///
    /// `request_timeout` of `None` waits until a reply arrives or the
    /// connection closes.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is closed
    /// - [`Error::RequestTimeout`] if no reply arrives in time
    /// - [`Error::ProtocolAction`] if the page answers with an `error` envelope
    /// - [`Error::Protocol`] if too many requests are outstanding
    pub async fn send(
        &self,
        envelope: Envelope,
        required_action: Action,
        request_timeout: Option<Duration>,
    ) -> Result<Reply> {
        let request_id = envelope.request_id;

        {
            let listeners = self.listeners.lock();
            if listeners.len() >= self.max_pending {
                warn!(
                    pending = listeners.len(),
                    max = self.max_pending,
                    "Too many pending requests"
                );
                return Err(Error::protocol(format!(
                    "Too many pending requests: {}/{}",
                    listeners.len(),
                    self.max_pending
                )));
            }
        }

        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(ConnectionCommand::Send {
                envelope,
                required_action,
                reply_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        // Dropping this future before the reply arrives (timeout, abort)
        // removes the listener.
        let guard = ListenerGuard {
            connection: self,
            request_id,
        };

        let result = match request_timeout {
            None => reply_rx.await.unwrap_or(Err(Error::ConnectionClosed)),
            Some(limit) => match timeout(limit, reply_rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(Error::ConnectionClosed),
                Err(_) => {
                    return Err(Error::request_timeout(
                        request_id,
                        limit.as_millis() as u64,
                    ));
                }
            },
        };

        guard.disarm();
        result
    }

    /// Drops the listener for `request_id` without resolving it.
    ///
    /// Returns `true` if a listener was registered. The removal is also
    /// queued to the event loop, behind any `send` for the same id that is
    /// still waiting to be written.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        let removed = self.listeners.lock().remove(&request_id).is_some();
        let _ = self
            .command_tx
            .send(ConnectionCommand::RemoveListener(request_id));

        if removed {
            debug!(%request_id, "Listener cancelled");
        }
        removed
    }

    /// Closes the socket and waits for the event loop to finish.
    ///
    /// Safe to call on an already closed connection.
    pub async fn close(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);

        let mut closed_rx = self.closed_rx.clone();
        // Sender dropped means the loop is gone as well.
        let _ = closed_rx.wait_for(|closed| *closed).await;
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop(
        ws_stream: WebSocket,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        listeners: Arc<Mutex<ListenerMap>>,
        closed_tx: watch::Sender<bool>,
        on_close: CloseHandler,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let reason = loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if codec::is_disconnect(text.as_str()) {
                                debug!("Disconnect requested by remote");
                                let _ = ws_write.close().await;
                                break CloseReason::DisconnectRequested;
                            }
                            Self::handle_incoming_message(text.as_str(), &listeners);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break CloseReason::RemoteClosed;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break CloseReason::Failed;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break CloseReason::RemoteClosed;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { envelope, required_action, reply_tx }) => {
                            Self::handle_send_command(
                                envelope,
                                required_action,
                                reply_tx,
                                &mut ws_write,
                                &listeners,
                            ).await;
                        }

                        Some(ConnectionCommand::RemoveListener(request_id)) => {
                            if listeners.lock().remove(&request_id).is_some() {
                                debug!(%request_id, "Removed listener");
                            }
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break CloseReason::Shutdown;
                        }

                        None => {
                            debug!("Command channel closed");
                            let _ = ws_write.close().await;
                            break CloseReason::Shutdown;
                        }
                    }
                }
            }
        };

        Self::fail_pending_requests(&listeners);
        command_rx.close();
        closed_tx.send_replace(true);

        debug!(?reason, "Event loop terminated");
        on_close(reason);
    }

    /// Handles an incoming text frame from the page.
    ///
    /// Malformed frames are logged and dropped without resolving anything.
    fn handle_incoming_message(text: &str, listeners: &Arc<Mutex<ListenerMap>>) {
        let envelope = match codec::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, text = %text, "Dropping malformed message");
                return;
            }
        };

        let (action, request_id, payload) = envelope.into_parts();

        if action == Action::Error {
            match listeners.lock().remove(&request_id) {
                Some(listener) => {
                    let _ = listener.reply_tx.send(Err(Error::protocol_action(payload)));
                }
                None => warn!(%request_id, %payload, "Error envelope for unknown request"),
            }
            return;
        }

        let listener = {
            let mut listeners = listeners.lock();
            match listeners.get(&request_id) {
                Some(listener) if listener.required_action == action => {
                    listeners.remove(&request_id)
                }
                Some(_) => {
                    trace!(%request_id, %action, "Reply action does not match listener");
                    None
                }
                None => {
                    warn!(%request_id, %action, "Reply for unknown request");
                    None
                }
            }
        };

        if let Some(listener) = listener {
            let _ = listener.reply_tx.send(Ok(Reply {
                request_id,
                result: payload,
            }));
        }
    }

    /// Handles a send command from the Rust API.
    async fn handle_send_command(
        envelope: Envelope,
        required_action: Action,
        reply_tx: oneshot::Sender<Result<Reply>>,
        ws_write: &mut SplitSink<WebSocket, Message>,
        listeners: &Arc<Mutex<ListenerMap>>,
    ) {
        let request_id = envelope.request_id;

        if reply_tx.is_closed() {
            trace!(%request_id, "Sender gone before write, skipping");
            return;
        }

        let text = match codec::encode(&envelope) {
            Ok(text) => text,
            Err(e) => {
                let _ = reply_tx.send(Err(e));
                return;
            }
        };

        // Register before writing so a fast reply cannot be missed.
        listeners.lock().insert(
            request_id,
            Listener {
                required_action,
                reply_tx,
            },
        );

        if let Err(e) = ws_write.send(Message::Text(text.into())).await
            && let Some(listener) = listeners.lock().remove(&request_id)
        {
            let _ = listener.reply_tx.send(Err(Error::connection(e.to_string())));
            return;
        }

        trace!(%request_id, action = %envelope.action, "Envelope sent");
    }

    /// Fails all outstanding listeners with `ConnectionClosed`.
    fn fail_pending_requests(listeners: &Arc<Mutex<ListenerMap>>) {
        let pending: Vec<_> = listeners.lock().drain().collect();
        let count = pending.len();

        for (_, listener) in pending {
            let _ = listener.reply_tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on close");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
