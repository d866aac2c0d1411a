//! JSON-RPC provider backed by the relay endpoint.
//!
//! Implements the callback-style provider contract (`send` / `sendAsync`)
//! expected by Ethereum client libraries, plus async conveniences.
//!
//! # Pending Calls
//!
//! Every accepted `send` registers its callback under a fresh [`RequestId`].
//! The entry is removed exactly once: when the reply arrives, when the
//! request fails (timeout, closed connection), or when it is abandoned. A
//! resolution that finds no entry is ignored.
//!
//! # Result Normalisation
//!
//! | Field | Rule |
//! |-------|------|
//! | `gasPrice`, `value` | Decimal-integer strings become numbers |
//! | `logIndex` | The whole result is wrapped as `[result]` |
//! | `error` | Unless falsy (`null`, `false`, `""`, `0`), the callback receives [`Error::RemoteExecution`] |
//!
//! # Example
//!
//! ```no_run
//! use browser_wallet_relay::Endpoint;
//! use serde_json::json;
//!
//! # async fn example(endpoint: Endpoint) -> browser_wallet_relay::Result<()> {
//! let provider = endpoint.provider();
//!
//! provider.send(
//!     json!({"id": 1, "jsonrpc": "2.0", "method": "eth_chainId", "params": []}),
//!     |result| println!("{result:?}"),
//! );
//!
//! let balance = provider
//!     .call("eth_getBalance", json!(["0xabc", "latest"]))
//!     .await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Number, Value};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Action, RpcRequest, RpcResponse};
use crate::transport::{Endpoint, Reply};

// ============================================================================
// Types
// ============================================================================

/// Callback receiving the outcome of one provider request.
pub type Callback = Box<dyn FnOnce(Result<RpcResponse>) + Send>;

/// A registered callback and the task relaying its request.
struct PendingCall {
    callback: Callback,
    relay: AbortHandle,
}

/// Map of request IDs to pending calls.
type PendingMap = FxHashMap<RequestId, PendingCall>;

// ============================================================================
// Constants
// ============================================================================

/// Result fields whose decimal strings are coerced to numbers.
const NUMERIC_FIELDS: [&str; 2] = ["gasPrice", "value"];

/// Result field that marks a log entry.
const LOG_INDEX_FIELD: &str = "logIndex";

// ============================================================================
// Provider
// ============================================================================

/// JSON-RPC provider relaying every request to the browser wallet.
///
/// Cloning is cheap; clones share the Pending Call table.
#[derive(Clone)]
pub struct Provider {
    endpoint: Endpoint,
    pending: Arc<Mutex<PendingMap>>,
    next_rpc_id: Arc<AtomicU64>,
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("endpoint", &self.endpoint)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Provider {
    /// Creates a provider over an endpoint.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            pending: Arc::new(Mutex::new(PendingMap::default())),
            next_rpc_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Returns the underlying endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the number of callbacks awaiting a reply.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Relays a JSON-RPC request and invokes `callback` exactly once.
    ///
    /// If no page is connected the callback runs before this returns, with
    /// [`Error::NotConnected`], and nothing is registered. Otherwise the
    /// callback is registered under a fresh id, which is returned so the
    /// call can be [abandoned](Provider::abandon).
    ///
    /// Must be called from within a tokio runtime.
    pub fn send<F>(&self, payload: Value, callback: F) -> Option<RequestId>
    where
        F: FnOnce(Result<RpcResponse>) + Send + 'static,
    {
        if !self.endpoint.ready() {
            callback(Err(Error::NotConnected));
            return None;
        }

        let request_id = RequestId::generate();
        let rpc_id = payload.get("id").cloned().unwrap_or(Value::Null);

        let endpoint = self.endpoint.clone();
        let pending = Arc::clone(&self.pending);

        // Registered under the lock so the task cannot resolve first.
        let mut calls = self.pending.lock();
        let relay = tokio::spawn(async move {
            let outcome = endpoint
                .send(Action::Execute, request_id, payload, Action::Executed)
                .await;

            let Some(call) = pending.lock().remove(&request_id) else {
                debug!(%request_id, "Resolution for a call no longer pending");
                return;
            };

            (call.callback)(Self::resolve(rpc_id, outcome));
        });

        calls.insert(
            request_id,
            PendingCall {
                callback: Box::new(callback),
                relay: relay.abort_handle(),
            },
        );
        drop(calls);
        trace!(%request_id, "Pending call registered");

        Some(request_id)
    }

    /// Same as [`Provider::send`].
    #[inline]
    pub fn send_async<F>(&self, payload: Value, callback: F) -> Option<RequestId>
    where
        F: FnOnce(Result<RpcResponse>) + Send + 'static,
    {
        self.send(payload, callback)
    }

    /// Relays a JSON-RPC request and waits for its response.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no page is connected
    /// - [`Error::RemoteExecution`] if the wallet reported an error
    /// - [`Error::RequestTimeout`] / [`Error::ConnectionClosed`] on transport failure
    /// - [`Error::ChannelClosed`] if the call was abandoned
    pub async fn request(&self, payload: Value) -> Result<RpcResponse> {
        let (tx, rx) = oneshot::channel();

        self.send(payload, move |result| {
            let _ = tx.send(result);
        });

        rx.await?
    }

    /// Calls a wallet method and returns the normalised result.
    ///
    /// # Errors
    ///
    /// See [`Provider::request`].
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let rpc_id = self.next_rpc_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(rpc_id, method, params);

        let response = self.request(request.to_value()).await?;
        Ok(response.result)
    }

    /// Drops a pending call without invoking its callback.
    ///
    /// The relay task is stopped and the endpoint's reply listener
    /// cancelled, so the call stops counting toward the pending limit.
    /// Returns `false` if the call had already been resolved.
    pub fn abandon(&self, request_id: RequestId) -> bool {
        let Some(call) = self.pending.lock().remove(&request_id) else {
            return false;
        };

        call.relay.abort();
        self.endpoint.cancel(request_id);
        debug!(%request_id, "Pending call abandoned");
        true
    }

    /// Turns a transport outcome into the callback argument.
    fn resolve(rpc_id: Value, outcome: Result<Reply>) -> Result<RpcResponse> {
        let reply = outcome?;

        if let Some(error) = reply.result.get("error")
            && is_truthy(error)
        {
            return Err(Error::remote_execution(error_message(error)));
        }

        Ok(RpcResponse::new(rpc_id, format_result(reply.result)))
    }
}

// ============================================================================
// Result Normalisation
// ============================================================================

/// Normalises a wallet result for JSON-RPC consumers.
///
/// Idempotent: formatting an already formatted result changes nothing.
#[must_use]
pub fn format_result(mut result: Value) -> Value {
    let mut wrap = false;

    if let Value::Object(map) = &mut result {
        for key in NUMERIC_FIELDS {
            if let Some(field) = map.get_mut(key) {
                coerce_decimal_string(field);
            }
        }
        wrap = map.get(LOG_INDEX_FIELD).is_some_and(|index| !index.is_null());
    }

    if wrap {
        Value::Array(vec![result])
    } else {
        result
    }
}

/// Replaces a decimal-integer string with the number it spells.
///
/// Hex strings and anything else are left as they are.
fn coerce_decimal_string(field: &mut Value) {
    let coerced = match field {
        Value::String(text) if is_decimal_integer(text) => parse_decimal(text),
        _ => None,
    };

    if let Some(number) = coerced {
        *field = number;
    }
}

fn is_decimal_integer(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

/// Parses into `u64` when it fits, otherwise `f64`.
fn parse_decimal(text: &str) -> Option<Value> {
    match text.parse::<u64>() {
        Ok(n) => Some(Value::from(n)),
        Err(_) => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
    }
}

/// JavaScript truthiness, as the page computes it for `result.error`.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Extracts a readable message from a wallet `error` field.
fn error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
