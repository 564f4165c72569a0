//! Raw wire message types for the broker protocol.
//!
//! The broker identifies every message by a small integer type code carried
//! under the `"t"` key; the rest of the payload is a flat, loosely-typed
//! field map. The same logical value can appear under different keys across
//! message variants, so nothing here interprets fields — that is the
//! normalizer's job.

use serde_json::{Map, Value};

/// Known broker message type codes.
pub mod codes {
    /// Connection/session confirmation.
    pub const CONNECTION_ACK: u16 = 100;
    /// Net position change for an account/instrument.
    pub const POSITION_UPDATE: u16 = 201;
    /// Working-order state change.
    pub const ORDER_UPDATE: u16 = 202;
    /// Execution report.
    pub const FILL: u16 = 203;
    /// Account balance statement.
    pub const ACCOUNT_BALANCE: u16 = 301;
    /// Account info variant; also carries a balance field under other names.
    pub const ACCOUNT_INFO: u16 = 302;
    /// Margin info variant; also carries a balance field under other names.
    pub const MARGIN_INFO: u16 = 303;
    /// Market data tick.
    pub const MARKET_TICK: u16 = 401;
}

/// A single inbound broker message: type code plus field map.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Message type code.
    pub kind: u16,
    /// Loosely-typed payload fields, aliases unresolved.
    pub fields: Map<String, Value>,
}

impl RawMessage {
    /// Build a message from a type code and field map.
    pub fn new(kind: u16, fields: Map<String, Value>) -> Self {
        Self { kind, fields }
    }

    /// Parse a wire JSON object of the form `{"t": <code>, ...fields}`.
    /// Returns `None` for payloads that are not objects or lack a type code.
    pub fn from_json(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        let mut fields = match value {
            Value::Object(map) => map,
            _ => return None,
        };
        let kind = fields.remove("t")?.as_u64()? as u16;
        Some(Self { kind, fields })
    }

    /// Look up a field by exact key.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_extracts_type_code() {
        let msg = RawMessage::from_json(r#"{"t": 301, "cashBalance": 25000.0}"#).unwrap();
        assert_eq!(msg.kind, codes::ACCOUNT_BALANCE);
        assert!(msg.field("cashBalance").is_some());
        assert!(msg.field("t").is_none());
    }

    #[test]
    fn test_from_json_rejects_non_objects() {
        assert!(RawMessage::from_json("[1, 2, 3]").is_none());
        assert!(RawMessage::from_json(r#"{"noTypeCode": true}"#).is_none());
        assert!(RawMessage::from_json("not json").is_none());
    }
}
