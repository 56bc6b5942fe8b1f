//! Wire envelope shared by both directions of the session
//!
//! Every frame is one JSON object `{type, payload, timestamp}`. The payload is
//! opaque at this level; [`super::protocol`] gives it types.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::ProtocolError;

/// One message on the wire, or one event on the bus
///
/// Lifecycle events raised by the session itself (`connecting`, `connected`, ...)
/// use the same shape with a `null` payload so subscribers see a single type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default = "empty_payload")]
    pub payload: Value,

    /// Wall-clock seconds at send time. Not monotonic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

fn empty_payload() -> Value {
    Value::Object(Map::new())
}

impl Envelope {
    /// Stamps a new outbound envelope with the current wall-clock time
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            timestamp: Some(now_seconds()),
        }
    }

    /// Event raised locally by the session, carrying no payload
    pub fn lifecycle(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            payload: Value::Null,
            timestamp: Some(now_seconds()),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// Credentials frame sent before anything else when the server wants a login.
///
/// Not an [`Envelope`]: the server reads `username`/`password` at the
/// top level and expects no `payload` or `timestamp`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    username: &'a str,
    password: &'a str,
}

impl<'a> AuthFrame<'a> {
    pub fn new(username: &'a str, password: &'a str) -> Self {
        Self {
            kind: "auth",
            username,
            password,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Seconds since the unix epoch with microsecond resolution
pub fn now_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_then_decode_keeps_type_and_payload() {
        let sent = Envelope::new("set_volume", json!({ "value": 42.5 }));
        let received = Envelope::decode(&sent.encode().unwrap()).unwrap();

        assert_eq!(received.kind, "set_volume");
        assert_eq!(received.payload, json!({ "value": 42.5 }));
        assert!(received.timestamp.is_some());
    }

    #[test]
    fn missing_payload_decodes_as_empty_object() {
        let env = Envelope::decode(r#"{"type":"play"}"#).unwrap();
        assert_eq!(env.payload, json!({}));
        assert_eq!(env.timestamp, None);
    }

    #[test]
    fn invalid_json_is_rejected() {
        assert!(matches!(
            Envelope::decode("{not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(Envelope::decode(r#"{"payload":{}}"#).is_err());
    }

    #[test]
    fn auth_frame_has_no_envelope_fields() {
        let text = AuthFrame::new("operator", "hunter2").encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(
            value,
            json!({ "type": "auth", "username": "operator", "password": "hunter2" })
        );
    }

    #[test]
    fn timestamp_is_wall_clock_seconds() {
        let ts = Envelope::new("get_state", json!({})).timestamp.unwrap();
        // 2020-01-01 in seconds; a millisecond timestamp would be ~1000x larger
        assert!(ts > 1_577_836_800.0 && ts < 1.0e11);
    }
}
