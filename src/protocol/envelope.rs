//! Envelope and action types.
//!
//! Every frame exchanged over the relay socket (except the bare
//! `"disconnect"` control message) is an [`Envelope`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::RequestId;

// ============================================================================
// Action
// ============================================================================

/// Envelope action discriminator.
///
/// Unknown actions are kept verbatim so they survive a decode/encode cycle;
/// receivers ignore them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    /// Relay asks the page to run a wallet method.
    Execute,
    /// Page answers an `execute`.
    Executed,
    /// Page reports a protocol-level failure.
    Error,
    /// Any other action string.
    Other(String),
}

impl Action {
    /// Returns the wire name of the action.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Execute => "execute",
            Self::Executed => "executed",
            Self::Error => "error",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for Action {
    fn from(value: String) -> Self {
        match value.as_str() {
            "execute" => Self::Execute,
            "executed" => Self::Executed,
            "error" => Self::Error,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for Action {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        match action {
            Action::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// A relay message.
///
/// # Format
///
/// ```json
/// {
///   "action": "execute",
///   "requestId": "550e8400-e29b-41d4-a716-446655440000",
///   "payload": { "method": "eth_accounts", "params": [] }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// What the receiver should do with the payload.
    pub action: Action,

    /// Correlation id chosen by the side that initiated the request.
    #[serde(rename = "requestId")]
    pub request_id: RequestId,

    /// Action-specific body.
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Creates a new envelope.
    #[inline]
    #[must_use]
    pub fn new(action: impl Into<Action>, request_id: RequestId, payload: Value) -> Self {
        Self {
            action: action.into(),
            request_id,
            payload,
        }
    }

    /// Creates an `execute` envelope.
    #[inline]
    #[must_use]
    pub fn execute(request_id: RequestId, payload: Value) -> Self {
        Self::new(Action::Execute, request_id, payload)
    }

    /// Creates an `executed` envelope.
    #[inline]
    #[must_use]
    pub fn executed(request_id: RequestId, payload: Value) -> Self {
        Self::new(Action::Executed, request_id, payload)
    }

    /// Decomposes the envelope into its routing tuple.
    #[inline]
    #[must_use]
    pub fn into_parts(self) -> (Action, RequestId, Value) {
        (self.action, self.request_id, self.payload)
    }
}

// ============================================================================
// Tests
// ============================================================================
