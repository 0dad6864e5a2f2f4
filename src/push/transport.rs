//! Push Transport Port
//!
//! Wire types and the channel boundary for the push connection. The
//! production channel is the host application's websocket; tests inject
//! scripted channels.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

// == Push Envelope ==
/// Inbound (and published) message shape: `{type, payload}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

// == Control Message ==
/// Outbound subscription control frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
}

// == Push Channel ==
/// One open bidirectional connection. `recv` returns `None` once the
/// channel has closed, for any reason.
#[async_trait]
pub trait PushChannel: Send {
    async fn send(&mut self, text: String) -> Result<()>;
    async fn recv(&mut self) -> Option<String>;
}

// == Push Transport ==
/// Opens channels against a push endpoint.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn PushChannel>>;
}

// == Endpoint Derivation ==
/// Builds the push endpoint from the application origin, the configured
/// path, and the session's auth token.
pub fn derive_endpoint(origin: &str, path: &str, token: Option<&str>) -> String {
    let ws_origin = origin
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    match token {
        Some(token) => format!("{ws_origin}{path}?token={token}"),
        None => format!("{ws_origin}{path}"),
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_control_message_wire_shape() {
        let frame = serde_json::to_value(ControlMessage::Subscribe {
            topics: vec!["video.updated".to_string()],
        })
        .unwrap();

        assert_eq!(
            frame,
            json!({"type": "subscribe", "topics": ["video.updated"]})
        );
    }

    #[test]
    fn test_envelope_payload_defaults_to_null() {
        let env: PushEnvelope = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert_eq!(env.kind, "ping");
        assert!(env.payload.is_null());
    }

    #[test]
    fn test_derive_endpoint() {
        assert_eq!(
            derive_endpoint("https://app.example.com", "/push", Some("tok123")),
            "wss://app.example.com/push?token=tok123"
        );
        assert_eq!(
            derive_endpoint("http://localhost:8080", "/push", None),
            "ws://localhost:8080/push"
        );
    }
}
