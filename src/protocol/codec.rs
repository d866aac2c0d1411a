//! Envelope encoding, decoding and routing.
//!
//! Pure and stateless: text in, envelope out (and back).

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Value, from_str, to_string};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::envelope::{Action, Envelope};

// ============================================================================
// Constants
// ============================================================================

/// Bare control message that tears the connection down.
pub const DISCONNECT_MESSAGE: &str = "disconnect";

// ============================================================================
// Functions
// ============================================================================

/// Encodes an envelope as a text frame.
///
/// # Errors
///
/// Returns [`Error::Json`] if the payload cannot be serialized.
pub fn encode(envelope: &Envelope) -> Result<String> {
    Ok(to_string(envelope)?)
}

/// Decodes a text frame into an envelope.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the text is not a valid envelope.
pub fn decode(text: &str) -> Result<Envelope> {
    from_str(text).map_err(|e| Error::parse(format!("is it valid JSON? {e}")))
}

/// Decodes a text frame into its `(action, request_id, payload)` tuple.
///
/// # Errors
///
/// - [`Error::Parse`] if the text is not a valid envelope
/// - [`Error::ProtocolAction`] if the envelope's action is `"error"`
pub fn route(text: &str) -> Result<(Action, RequestId, Value)> {
    let envelope = decode(text)?;
    if envelope.action == Action::Error {
        return Err(Error::protocol_action(envelope.payload));
    }
    Ok(envelope.into_parts())
}

/// Returns `true` if the frame is the bare disconnect control message.
#[inline]
#[must_use]
pub fn is_disconnect(text: &str) -> bool {
    text == DISCONNECT_MESSAGE
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_route_executed() {
        let id = RequestId::generate();
        let text = encode(&Envelope::executed(id, json!(["0xabc"]))).expect("encode");

        let (action, request_id, payload) = route(&text).expect("route");
        assert_eq!(action, Action::Executed);
        assert_eq!(request_id, id);
        assert_eq!(payload, json!(["0xabc"]));
    }

    #[test]
    fn test_route_rejects_error_action() {
        let id = RequestId::generate();
        let text = encode(&Envelope::new(Action::Error, id, json!({"message": "boom"})))
            .expect("encode");

        match route(&text) {
            Err(Error::ProtocolAction { payload }) => assert_eq!(payload["message"], "boom"),
            other => panic!("expected protocol action error, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_malformed_is_parse_error() {
        assert!(matches!(decode("{not json"), Err(Error::Parse { .. })));
        assert!(matches!(decode("disconnect"), Err(Error::Parse { .. })));
        assert!(matches!(
            decode(r#"{"action":"execute"}"#),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn test_is_disconnect() {
        assert!(is_disconnect("disconnect"));
        assert!(!is_disconnect("\"disconnect\""));
        assert!(!is_disconnect("Disconnect"));
    }

    fn json_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 _x]{0,16}".prop_map(Value::from),
        ]
    }

    fn json_value() -> impl Strategy<Value = Value> {
        json_leaf().prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::from),
                prop::collection::btree_map("[a-zA-Z]{1,8}", inner, 0..6)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_encode_decode_preserves_tuple(
            action in prop_oneof![
                Just(Action::Execute),
                Just(Action::Executed),
                "[a-z]{1,10}".prop_map(Action::from),
            ],
            payload in json_value(),
        ) {
            let id = RequestId::generate();
            let envelope = Envelope::new(action.clone(), id, payload.clone());
            let decoded = decode(&encode(&envelope).unwrap()).unwrap();

            prop_assert_eq!(decoded.action, action);
            prop_assert_eq!(decoded.request_id, id);
            prop_assert_eq!(decoded.payload, payload);
        }
    }
}
