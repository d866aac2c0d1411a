//! Error types for the wallet relay.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use browser_wallet_relay::{Provider, Result};
//!
//! async fn example(provider: &Provider) -> Result<()> {
//!     let accounts = provider.call("eth_accounts", serde_json::json!([])).await?;
//!     println!("{accounts}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::NotConnected`], [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::ConnectionRejected`] |
//! | Protocol | [`Error::Parse`], [`Error::ProtocolAction`], [`Error::Protocol`] |
//! | Execution | [`Error::RemoteExecution`], [`Error::RequestTimeout`] |
//! | Wallet | [`Error::WalletNotFound`], [`Error::WalletLocked`], [`Error::Wallet`], [`Error::InvalidSignature`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when relay options are invalid or the endpoint is misused.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// No browser page is connected.
    ///
    /// Reported synchronously to a provider callback; the request never
    /// reaches the wire.
    #[error("Unable to send. Not connected to a wallet socket.")]
    NotConnected,

    /// WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Timeout waiting for the browser page to connect.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// WebSocket connection closed while a request was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A second browser page tried to connect while one was active.
    ///
    /// Only ever logged; the rejected socket is simply closed.
    #[error("Connection rejected: another channel is already connected")]
    ConnectionRejected,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Message text is not a valid envelope.
    #[error("Could not parse message from socket: {message}")]
    Parse {
        /// Parser diagnostic.
        message: String,
    },

    /// Envelope with `action: "error"` received.
    #[error("Remote reported a protocol error: {payload}")]
    ProtocolAction {
        /// Payload carried by the error envelope.
        payload: Value,
    },

    /// Protocol violation or resource limit.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// The wallet call on the remote side failed.
    #[error("Remote execution failed: {message}")]
    RemoteExecution {
        /// Error message reported by the wallet.
        message: String,
    },

    /// Request timeout.
    ///
    /// Returned when no matching reply arrives within the configured bound.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Wallet Errors
    // ========================================================================
    /// No wallet is injected into the page.
    #[error("Wallet not found")]
    WalletNotFound,

    /// The wallet exposes no unlocked account.
    #[error("Wallet is locked: unlock it first and then reload")]
    WalletLocked,

    /// The wallet rejected or failed a call.
    #[error("Wallet error: {message}")]
    Wallet {
        /// Message reported by the wallet.
        message: String,
    },

    /// Signature returned by the wallet has an unexpected shape.
    #[error("Invalid signature: {message}")]
    InvalidSignature {
        /// What was wrong with it.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a parse error.
    #[inline]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a protocol action error carrying the remote payload.
    #[inline]
    pub fn protocol_action(payload: Value) -> Self {
        Self::ProtocolAction { payload }
    }

    /// Creates a remote execution error.
    #[inline]
    pub fn remote_execution(message: impl Into<String>) -> Self {
        Self::RemoteExecution {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a wallet error.
    #[inline]
    pub fn wallet(message: impl Into<String>) -> Self {
        Self::Wallet {
            message: message.into(),
        }
    }

    /// Creates an invalid signature error.
    #[inline]
    pub fn invalid_signature(message: impl Into<String>) -> Self {
        Self::InvalidSignature {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::ConnectionRejected
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the error originated on the wallet side.
    #[inline]
    #[must_use]
    pub fn is_remote_error(&self) -> bool {
        matches!(
            self,
            Self::RemoteExecution { .. } | Self::ProtocolAction { .. } | Self::Wallet { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
