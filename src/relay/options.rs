//! Relay endpoint options.
//!
//! Options can be built in code or deserialized from JSON. Deserialized
//! options merge over the defaults; unrecognised keys are kept in
//! [`RelayOptions::extra`] and otherwise ignored.
//!
//! # Example
//!
//! ```ignore
//! use browser_wallet_relay::RelayOptions;
//!
//! let options = RelayOptions::from_json(serde_json::json!({ "port": 4444 }))?;
//! assert_eq!(options.port, 4444);
//! assert_eq!(options.max_pending, 100);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default listening port.
pub const DEFAULT_PORT: u16 = 3333;

/// Default bind address (loopback only).
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Default directory holding the browser page assets.
pub const DEFAULT_STATIC_DIR: &str = "client";

/// Default bound on a single request, in milliseconds.
///
/// Generous because most calls wait on a human confirming in the wallet.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 120_000;

/// Default maximum of outstanding requests per connection.
pub const DEFAULT_MAX_PENDING: usize = 100;

// ============================================================================
// RelayOptions
// ============================================================================

/// Listening and request options for the relay endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelayOptions {
    /// Address to bind.
    pub host: IpAddr,

    /// Port to bind (0 picks a free port).
    pub port: u16,

    /// Directory served over HTTP next to the WebSocket endpoint.
    pub static_dir: Option<PathBuf>,

    /// Per-request timeout in milliseconds; `None` waits forever.
    pub request_timeout_ms: Option<u64>,

    /// Maximum outstanding requests before new ones are rejected.
    pub max_pending: usize,

    /// Unrecognised keys, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST,
            port: DEFAULT_PORT,
            static_dir: Some(PathBuf::from(DEFAULT_STATIC_DIR)),
            request_timeout_ms: Some(DEFAULT_REQUEST_TIMEOUT_MS),
            max_pending: DEFAULT_MAX_PENDING,
            extra: Map::new(),
        }
    }
}

impl RelayOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a JSON object over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a known key has the wrong type.
    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::config(format!("invalid options: {e}")))
    }

    /// Returns the socket address to bind.
    #[inline]
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Returns the per-request timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.max_pending == 0 {
            return Err(Error::config("maxPending must be greater than zero"));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(Error::config(
                "requestTimeoutMs must be greater than zero (use null to disable)",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
