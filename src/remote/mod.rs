//! Remote end of the relay.
//!
//! The code that runs next to the wallet: it checks wallet access, connects
//! back to the [`Endpoint`](crate::Endpoint) and answers `execute`
//! envelopes. The embedded browser page implements the same loop in
//! JavaScript; this module lets a Rust process play that role, which is
//! also how the relay is tested end to end.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Wallet`] | The signing capability (`window.ethereum` in a browser) |
//! | [`RemoteExecutor`] | Access check, connect, dispatch loop |
//! | [`RemoteHandle`] | Disconnect and wait on a running executor |
//! | [`DiagnosticLog`] | Rolling diagnostic messages |

// ============================================================================
// Submodules
// ============================================================================

/// Access check and dispatch loop.
pub mod executor;

/// Rolling diagnostic log.
pub mod log;

/// Wallet capability.
pub mod wallet;

// ============================================================================
// Re-exports
// ============================================================================

pub use executor::{ExecutorState, RemoteExecutor, RemoteHandle};
pub use log::{DiagnosticLog, LogEntry};
pub use wallet::Wallet;
