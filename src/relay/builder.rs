//! Builder pattern for endpoint configuration.
//!
//! Provides a fluent API for configuring and creating [`Endpoint`] instances.
//!
//! # Example
//!
//! ```no_run
//! use browser_wallet_relay::Endpoint;
//!
//! # async fn example() -> browser_wallet_relay::Result<()> {
//! let endpoint = Endpoint::builder()
//!     .port(3333)
//!     .on_connect(|| println!("wallet page connected"))
//!     .build()?;
//!
//! endpoint.start().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::transport::{ConnectHook, Endpoint};

use super::options::RelayOptions;

// ============================================================================
// RelayBuilder
// ============================================================================

/// Builder for configuring an [`Endpoint`].
///
/// Use [`Endpoint::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct RelayBuilder {
    /// Accumulated options.
    options: RelayOptions,
    /// Side effect run each time a page connects.
    on_connect: Option<ConnectHook>,
}

impl fmt::Debug for RelayBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayBuilder")
            .field("options", &self.options)
            .field("on_connect", &self.on_connect.is_some())
            .finish()
    }
}

// ============================================================================
// RelayBuilder Implementation
// ============================================================================

impl RelayBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all options at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: RelayOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the bind address.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: IpAddr) -> Self {
        self.options.host = host;
        self
    }

    /// Sets the listening port (0 for a random free port).
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.options.port = port;
        self
    }

    /// Sets the directory served next to the WebSocket endpoint.
    #[inline]
    #[must_use]
    pub fn static_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.static_dir = Some(path.into());
        self
    }

    /// Serves only the embedded page.
    #[inline]
    #[must_use]
    pub fn no_static_dir(mut self) -> Self {
        self.options.static_dir = None;
        self
    }

    /// Sets the per-request timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Waits for replies indefinitely.
    #[inline]
    #[must_use]
    pub fn no_request_timeout(mut self) -> Self {
        self.options.request_timeout_ms = None;
        self
    }

    /// Sets the maximum number of outstanding requests.
    #[inline]
    #[must_use]
    pub fn max_pending(mut self, max_pending: usize) -> Self {
        self.options.max_pending = max_pending;
        self
    }

    /// Registers a side effect run each time a page connects.
    #[inline]
    #[must_use]
    pub fn on_connect<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    /// Builds the endpoint with validation.
    ///
    /// The endpoint does not listen until [`Endpoint::start`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the options are invalid.
    pub fn build(self) -> Result<Endpoint> {
        self.options.validate()?;
        Ok(Endpoint::new(self.options, self.on_connect))
    }
}

// ============================================================================
// Tests
// ============================================================================
