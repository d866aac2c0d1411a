//! WebSocket transport layer.
//!
//! This module handles communication between the local end (Rust) and the
//! remote end (browser page holding the wallet) via WebSocket.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Provider       │                              │  Browser page   │
//! │  (Rust)         │         WebSocket            │                 │
//! │  Endpoint       │◄────────────────────────────►│  window.ethereum│
//! │  → Connection   │      host:PORT               │  executor       │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! The same listener answers plain HTTP requests with the page assets.
//!
//! # Connection Lifecycle
//!
//! 1. `Endpoint::start` - Bind the listener
//! 2. The page is loaded over HTTP from the same port
//! 3. The page upgrades to a WebSocket; the slot becomes Connected
//! 4. `Connection` - Send envelopes, correlate replies
//! 5. `"disconnect"`, socket close, or `Endpoint::stop` frees the slot
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket connection and event loop |
//! | `server` | HTTP router, single-slot admission, send API |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and event loop.
pub mod connection;

/// Relay endpoint.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{CloseReason, Connection, Reply};
pub use server::{ConnectHook, ConnectionState, Endpoint};
