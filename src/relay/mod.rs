//! Relay endpoint configuration.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RelayBuilder`] | Fluent configuration builder |
//! | [`RelayOptions`] | Listening and request options |
//!
//! # Example
//!
//! ```no_run
//! use browser_wallet_relay::Endpoint;
//!
//! # async fn example() -> browser_wallet_relay::Result<()> {
//! let endpoint = Endpoint::builder().port(3333).build()?;
//! endpoint.start().await?;
//!
//! // Open http://127.0.0.1:3333 in a browser with a wallet extension.
//! endpoint.wait_connected(std::time::Duration::from_secs(300)).await?;
//!
//! let provider = endpoint.provider();
//! let accounts = provider.call("eth_accounts", serde_json::json!([])).await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Embedded browser page.
pub mod assets;

/// Fluent builder pattern for endpoint configuration.
pub mod builder;

/// Listening and request options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::RelayBuilder;
pub use options::RelayOptions;
