//! Browser Wallet Relay - use a browser wallet from Rust.
//!
//! This library relays JSON-RPC and signing requests from a Rust process to
//! a wallet extension (such as MetaMask) running in a browser page.
//!
//! # Architecture
//!
//! The relay follows a client-server model:
//!
//! - **Local End (Rust)**: [`Endpoint`] listens on `host:port`, serves the
//!   wallet page and accepts one WebSocket channel; [`Provider`] turns
//!   JSON-RPC calls into `execute` envelopes
//! - **Remote End (Page)**: checks wallet access, connects back and answers
//!   each `execute` with an `executed` envelope
//!
//! Key design principles:
//!
//! - At most one page is connected at a time; a second one is closed
//! - Every request carries a fresh UUID [`RequestId`]; replies may arrive in
//!   any order
//! - Every pending request is resolved exactly once: reply, error, timeout,
//!   or connection loss
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use browser_wallet_relay::{Endpoint, Eth, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let endpoint = Endpoint::builder().port(3333).build()?;
//!     endpoint.start().await?;
//!
//!     println!("Open {} in a browser with a wallet", endpoint.http_url().unwrap_or_default());
//!     endpoint.wait_connected(Duration::from_secs(300)).await?;
//!
//!     let eth = Eth::new(endpoint.provider());
//!     let account = eth.get_address().await?;
//!     println!("Account: {}", account.address);
//!
//!     endpoint.stop().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire envelope, codec and JSON-RPC shapes |
//! | [`transport`] | Listener, connection slot and event loop |
//! | [`relay`] | Options, builder and embedded page |
//! | [`provider`] | JSON-RPC provider facade |
//! | [`remote`] | Remote execution loop |
//! | [`signer`] | Signing facade |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Relay wire protocol.
pub mod protocol;

/// JSON-RPC provider over the relay.
pub mod provider;

/// Endpoint configuration and the embedded page.
pub mod relay;

/// Remote end: wallet access and request execution.
pub mod remote;

/// Signing facade.
pub mod signer;

/// WebSocket transport layer.
///
/// Listener, single connection slot, and per-connection event loop.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::RequestId;

// Protocol types
pub use protocol::{Action, Envelope, RpcRequest, RpcResponse};

// Provider types
pub use provider::{Callback, Provider, format_result};

// Configuration types
pub use relay::{RelayBuilder, RelayOptions};

// Remote types
pub use remote::{DiagnosticLog, ExecutorState, RemoteExecutor, RemoteHandle, Wallet};

// Signing types
pub use signer::{AddressInfo, Eth, Signature};

// Transport types
pub use transport::{ConnectionState, Endpoint, Reply};
