//! Hardware-wallet style signing facade.
//!
//! [`Eth`] exposes the call shapes of a hardware-wallet app (address
//! lookup, message and typed-data signing) and fulfils them by relaying
//! JSON-RPC calls to the browser wallet. No key material or cryptography
//! lives here; the wallet does all signing.
//!
//! # Methods
//!
//! | Method | Wallet call |
//! |--------|-------------|
//! | [`Eth::get_address`] | `eth_accounts` |
//! | [`Eth::sign_personal_message`] | `personal_sign` |
//! | [`Eth::sign_hash`] | `eth_sign` |
//! | [`Eth::sign_typed_data`] | `eth_signTypedData_v4` |
//! | [`Eth::send_transaction`] | `eth_sendTransaction` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{Error, Result};
use crate::provider::Provider;

// ============================================================================
// Constants
// ============================================================================

/// Length of an `r || s || v` signature in bytes.
const SIGNATURE_LEN: usize = 65;

/// Offset added to a raw recovery id.
const V_OFFSET: u8 = 27;

/// Typed-data domain type name.
const EIP712_DOMAIN: &str = "EIP712Domain";

/// Domain fields in canonical order, with their Solidity types.
const DOMAIN_FIELDS: [(&str, &str); 5] = [
    ("name", "string"),
    ("version", "string"),
    ("chainId", "uint256"),
    ("verifyingContract", "address"),
    ("salt", "bytes32"),
];

// ============================================================================
// AddressInfo
// ============================================================================

/// Account information as reported by a hardware-wallet app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInfo {
    /// Always empty; browser wallets do not expose public keys.
    pub public_key: String,
    /// Checksummed or lowercase address as returned by the wallet.
    pub address: String,
}

// ============================================================================
// Signature
// ============================================================================

/// An ECDSA signature split into its components.
///
/// `r` and `s` are lowercase hex without `0x`; `v` is 27 or 28.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// First 32 bytes, 64 hex digits.
    pub r: String,
    /// Second 32 bytes, 64 hex digits.
    pub s: String,
    /// Recovery byte in Ethereum form (27 or 28).
    pub v: u8,
}

impl Signature {
    /// Splits a 65-byte `0x`-prefixed (or bare) hex signature.
    ///
    /// A recovery id of 0 or 1 is normalised to 27 or 28.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if the text is not 65 bytes of hex
    /// or `v` is out of range.
    pub fn from_hex(signature: &str) -> Result<Self> {
        let digits = signature.strip_prefix("0x").unwrap_or(signature);
        let bytes = hex::decode(digits)
            .map_err(|e| Error::invalid_signature(format!("not hex: {e}")))?;

        if bytes.len() != SIGNATURE_LEN {
            return Err(Error::invalid_signature(format!(
                "expected {SIGNATURE_LEN} bytes, got {}",
                bytes.len()
            )));
        }

        let v = match bytes[64] {
            v @ (0 | 1) => v + V_OFFSET,
            v @ (27 | 28) => v,
            other => {
                return Err(Error::invalid_signature(format!(
                    "invalid recovery byte {other}"
                )));
            }
        };

        Ok(Self {
            r: hex::encode(&bytes[..32]),
            s: hex::encode(&bytes[32..64]),
            v,
        })
    }

    /// Returns the recovery id (0 or 1).
    ///
    /// A hand-built `v` that is already 0 or 1 is returned as is; anything
    /// below 27 otherwise saturates to 0.
    #[inline]
    #[must_use]
    pub fn recovery_id(&self) -> u8 {
        match self.v {
            v @ (0 | 1) => v,
            v => v.saturating_sub(V_OFFSET),
        }
    }

    /// Joins the components back into `0x{r}{s}{v}`.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}{}{:02x}", self.r, self.s, self.v)
    }
}

// ============================================================================
// Eth
// ============================================================================

/// Signing facade over a relay [`Provider`].
#[derive(Debug, Clone)]
pub struct Eth {
    provider: Provider,
}

impl Eth {
    /// Creates a facade over a provider.
    #[inline]
    #[must_use]
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }

    /// Returns the provider requests go through.
    #[inline]
    #[must_use]
    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Returns the wallet's first account.
    ///
    /// # Errors
    ///
    /// - [`Error::WalletLocked`] if the wallet exposes no account
    /// - Any error from [`Provider::call`]
    pub async fn get_address(&self) -> Result<AddressInfo> {
        let accounts = self.provider.call("eth_accounts", json!([])).await?;

        let address = accounts
            .get(0)
            .and_then(Value::as_str)
            .filter(|address| !address.is_empty())
            .ok_or(Error::WalletLocked)?;

        Ok(AddressInfo {
            public_key: String::new(),
            address: address.to_string(),
        })
    }

    /// Signs a message given as hex bytes with `personal_sign`.
    ///
    /// # Errors
    ///
    /// Returns an error if the wallet refuses or returns a malformed signature.
    pub async fn sign_personal_message(&self, message_hex: &str) -> Result<Signature> {
        let address = self.get_address().await?.address;
        let message = prefixed_hex(message_hex)?;

        let signature = self
            .provider
            .call("personal_sign", json!([message, address.to_lowercase()]))
            .await?;
        signature_from_result(&signature)
    }

    /// Signs a 32-byte hash with `eth_sign`.
    ///
    /// # Errors
    ///
    /// Returns an error if the hash is not hex, the wallet refuses, or the
    /// signature is malformed.
    pub async fn sign_hash(&self, hash_hex: &str) -> Result<Signature> {
        let address = self.get_address().await?.address;
        let hash = prefixed_hex(hash_hex)?;

        let signature = self
            .provider
            .call("eth_sign", json!([address, hash]))
            .await?;
        signature_from_result(&signature)
    }

    /// Signs EIP-712 typed data with `eth_signTypedData_v4`.
    ///
    /// `typed_data` holds `domain`, `types`, `primaryType` and `message`.
    /// Any `EIP712Domain` entry in `types` is replaced by one derived from
    /// the fields actually present in `domain`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `typed_data` lacks `domain`, `types` or
    /// `message`, or an error from the wallet.
    pub async fn sign_typed_data(&self, typed_data: &Value) -> Result<Signature> {
        let payload = typed_data_payload(typed_data)?;
        let address = self.get_address().await?.address;

        debug!(primary_type = %payload["primaryType"], "Signing typed data");

        let signature = self
            .provider
            .call(
                "eth_signTypedData_v4",
                json!([address.to_lowercase(), payload.to_string()]),
            )
            .await?;
        signature_from_result(&signature)
    }

    /// Sends a transaction through the wallet and returns its hash.
    ///
    /// `from` defaults to the wallet's first account.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `tx` is not an object, or an error from
    /// the wallet.
    pub async fn send_transaction(&self, tx: Value) -> Result<String> {
        let Value::Object(mut tx) = tx else {
            return Err(Error::config("transaction must be a JSON object"));
        };

        if !tx.contains_key("from") {
            let address = self.get_address().await?.address;
            tx.insert("from".to_string(), Value::String(address));
        }

        let hash = self
            .provider
            .call("eth_sendTransaction", json!([Value::Object(tx)]))
            .await?;

        hash.as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::protocol(format!("unexpected transaction hash {hash}")))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Validates hex input and returns it with a `0x` prefix.
fn prefixed_hex(text: &str) -> Result<String> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    hex::decode(digits).map_err(|e| Error::config(format!("invalid hex input: {e}")))?;
    Ok(format!("0x{digits}"))
}

fn signature_from_result(result: &Value) -> Result<Signature> {
    let text = result
        .as_str()
        .ok_or_else(|| Error::invalid_signature(format!("expected a hex string, got {result}")))?;
    Signature::from_hex(text)
}

/// Builds the `eth_signTypedData_v4` payload.
fn typed_data_payload(typed_data: &Value) -> Result<Value> {
    let domain = typed_data
        .get("domain")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::config("typed data is missing `domain`"))?;
    let types = typed_data
        .get("types")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::config("typed data is missing `types`"))?;
    let message = typed_data
        .get("message")
        .ok_or_else(|| Error::config("typed data is missing `message`"))?;

    let mut types: Map<String, Value> = types
        .iter()
        .filter(|(name, _)| name.as_str() != EIP712_DOMAIN)
        .map(|(name, fields)| (name.clone(), fields.clone()))
        .collect();

    let primary_type = match typed_data.get("primaryType").and_then(Value::as_str) {
        Some(primary_type) => primary_type.to_string(),
        None => infer_primary_type(&types)?,
    };

    types.insert(EIP712_DOMAIN.to_string(), domain_type(domain));

    Ok(json!({
        "types": types,
        "domain": domain,
        "primaryType": primary_type,
        "message": message,
    }))
}

/// Returns the `EIP712Domain` field list for the fields present in `domain`.
fn domain_type(domain: &Map<String, Value>) -> Value {
    DOMAIN_FIELDS
        .iter()
        .filter(|(name, _)| domain.get(*name).is_some_and(|value| !value.is_null()))
        .map(|(name, kind)| json!({ "name": name, "type": kind }))
        .collect()
}

/// Picks the single type that no other type references.
fn infer_primary_type(types: &Map<String, Value>) -> Result<String> {
    let referenced = |candidate: &str| {
        types.values().flat_map(|fields| fields.as_array().into_iter().flatten()).any(|field| {
            field
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|kind| kind.trim_end_matches("[]") == candidate)
        })
    };

    let mut roots = types.keys().filter(|name| !referenced(name.as_str()));
    match (roots.next(), roots.next()) {
        (Some(root), None) => Ok(root.clone()),
        _ => Err(Error::config("typed data has no unique primary type")),
    }
}

// ============================================================================
// Tests
// ============================================================================
