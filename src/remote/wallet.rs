//! Wallet capability seen by the remote executor.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

// ============================================================================
// Wallet
// ============================================================================

/// The signing capability available on the remote side.
///
/// In a browser this is the injected `window.ethereum` object. Errors a
/// wallet wants to surface verbatim should use
/// [`Error::Wallet`](crate::Error::Wallet).
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Returns `false` if no wallet is injected.
    fn is_present(&self) -> bool {
        true
    }

    /// Asks the wallet for account access.
    ///
    /// # Errors
    ///
    /// Returns an error if the user refuses access.
    async fn enable(&self) -> Result<()> {
        Ok(())
    }

    /// Executes one JSON-RPC method.
    ///
    /// # Errors
    ///
    /// Returns an error if the wallet rejects or fails the call.
    async fn request(&self, method: &str, params: Value) -> Result<Value>;
}
