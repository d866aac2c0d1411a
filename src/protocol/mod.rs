//! Relay wire protocol.
//!
//! This module defines the envelope exchanged between the relay (Rust) and
//! the page holding the wallet, plus the JSON-RPC shapes carried inside it.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | `execute` envelope | Relay → Page | Invoke a wallet method |
//! | `executed` envelope | Page → Relay | Result or `{error}` for a request |
//! | `error` envelope | Page → Relay | Protocol-level failure |
//! | `"disconnect"` | Page → Relay | Bare text, tears the connection down |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | `Envelope` and `Action` types |
//! | `codec` | Text encoding, decoding and routing |
//! | `rpc` | JSON-RPC request/response shapes |

// ============================================================================
// Submodules
// ============================================================================

/// Envelope encoding, decoding and routing.
pub mod codec;

/// Envelope and action types.
pub mod envelope;

/// JSON-RPC request and response shapes.
pub mod rpc;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{DISCONNECT_MESSAGE, decode, encode, is_disconnect, route};
pub use envelope::{Action, Envelope};
pub use rpc::{ExecutePayload, JSONRPC_VERSION, RpcRequest, RpcResponse};
