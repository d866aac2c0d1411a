//! JSON-RPC request and response shapes.
//!
//! The relay forwards the caller's request as the `execute` payload and
//! hands back a JSON-RPC 2.0 response built from the `executed` payload.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

// ============================================================================
// Constants
// ============================================================================

/// JSON-RPC protocol version tag.
pub const JSONRPC_VERSION: &str = "2.0";

// ============================================================================
// RpcRequest
// ============================================================================

/// A JSON-RPC request as produced by a provider consumer.
///
/// # Format
///
/// ```json
/// { "id": 1, "jsonrpc": "2.0", "method": "eth_accounts", "params": [] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Caller-chosen id, echoed in the response.
    #[serde(default)]
    pub id: Value,

    /// Protocol version.
    #[serde(default = "default_version")]
    pub jsonrpc: String,

    /// Method name.
    pub method: String,

    /// Positional or named parameters.
    #[serde(default = "default_params")]
    pub params: Value,
}

impl RpcRequest {
    /// Creates a new request.
    #[must_use]
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Converts the request into a JSON value suitable for `Provider::send`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "id": self.id,
            "jsonrpc": self.jsonrpc,
            "method": self.method,
            "params": self.params,
        })
    }
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

fn default_params() -> Value {
    Value::Array(Vec::new())
}

// ============================================================================
// ExecutePayload
// ============================================================================

/// Payload of an `execute` envelope as seen by the wallet side.
///
/// Only `method` and `params` are consumed; any other request fields are
/// ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutePayload {
    /// Wallet method name.
    pub method: String,

    /// Method parameters.
    #[serde(default = "default_params")]
    pub params: Value,
}

// ============================================================================
// RpcResponse
// ============================================================================

/// A JSON-RPC response delivered to the provider callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// The id of the originating request.
    pub id: Value,

    /// Always `"2.0"`.
    pub jsonrpc: String,

    /// Normalised result.
    pub result: Value,
}

impl RpcResponse {
    /// Creates a response for a request id.
    #[inline]
    #[must_use]
    pub fn new(id: Value, result: Value) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            result,
        }
    }

    /// Returns the result as a string, if it is one.
    #[inline]
    #[must_use]
    pub fn result_str(&self) -> Option<&str> {
        self.result.as_str()
    }
}

// ============================================================================
// Tests
// ============================================================================
