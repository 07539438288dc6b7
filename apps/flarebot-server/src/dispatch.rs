//! Socket Mode envelope parsing and routing.
//!
//! Every frame from Slack is either a system message (`hello`, `disconnect`)
//! or an envelope that must be acknowledged by `envelope_id`. Only Events API
//! envelopes carry anything the bot acts on; any other envelope (slash
//! commands, interactive payloads) is acknowledged and dropped.

use std::sync::Arc;

use flarebot_core::Router;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::error::ServerError;
use crate::handlers;
use crate::state::AppState;

/// An acknowledged unit of work from Socket Mode.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub envelope_id: String,
    pub envelope_type: EnvelopeType,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeType {
    EventsApi,
    /// Acknowledged so Slack stops redelivering, then dropped.
    Other,
}

impl EnvelopeType {
    fn from_wire(kind: &str) -> Self {
        match kind {
            "events_api" => Self::EventsApi,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSocketMessage {
    #[serde(rename = "type")]
    msg_type: String,

    #[serde(default)]
    envelope_id: Option<String>,

    #[serde(default)]
    payload: Option<serde_json::Value>,
}

/// A parsed Socket Mode frame.
#[derive(Debug)]
pub enum ParsedMessage {
    Hello,
    /// Slack is about to close this connection; reconnect.
    Disconnect,
    Envelope(Envelope),
}

/// Channel ID carried by an event payload, or `""`.
fn extract_channel(payload: Option<&serde_json::Value>) -> &str {
    payload
        .and_then(|p| p.get("event"))
        .and_then(|e| e.get("channel"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

/// User ID carried by an event payload, or `""`.
fn extract_user(payload: Option<&serde_json::Value>) -> &str {
    payload
        .and_then(|p| p.get("event"))
        .and_then(|e| e.get("user"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

/// Parses one WebSocket text frame.
///
/// Returns `Ok(None)` for unknown frame types and for envelopes without an
/// ID, both of which are logged and skipped.
///
/// # Errors
///
/// Returns `ServerError::Dispatch` if the frame is not valid JSON.
pub fn parse_message(text: &str) -> Result<Option<ParsedMessage>, ServerError> {
    let raw: RawSocketMessage =
        serde_json::from_str(text).map_err(|e| ServerError::Dispatch(format!("Bad JSON: {e}")))?;

    match raw.msg_type.as_str() {
        "hello" => {
            info!("Socket Mode connection established");
            return Ok(Some(ParsedMessage::Hello));
        }
        "disconnect" => {
            info!("Slack requested disconnect, will reconnect");
            return Ok(Some(ParsedMessage::Disconnect));
        }
        _ => {}
    }

    let Some(envelope_id) = raw.envelope_id else {
        warn!(msg_type = raw.msg_type, "Frame without envelope_id, ignoring");
        return Ok(None);
    };
    let envelope_type = EnvelopeType::from_wire(&raw.msg_type);

    debug!(
        envelope_id,
        envelope_type = ?envelope_type,
        channel = extract_channel(raw.payload.as_ref()),
        user = extract_user(raw.payload.as_ref()),
        "Parsed envelope",
    );

    Ok(Some(ParsedMessage::Envelope(Envelope {
        envelope_id,
        envelope_type,
        payload: raw.payload.unwrap_or(serde_json::Value::Null),
    })))
}

/// Routes an acknowledged envelope.
#[instrument(
    skip(state, router, envelope),
    fields(
        envelope_id = %envelope.envelope_id,
        envelope_type = ?envelope.envelope_type,
    )
)]
pub async fn dispatch(state: Arc<AppState>, router: Arc<Router>, envelope: Envelope) {
    match envelope.envelope_type {
        EnvelopeType::EventsApi => {
            handlers::events::handle_event(state, router, envelope.payload).await;
        }
        EnvelopeType::Other => {
            debug!("No handler for envelope type, dropping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_hello_message() {
        let json = r#"{"type":"hello","num_connections":1}"#;
        let parsed = parse_message(json).expect("parse").expect("some");
        assert!(matches!(parsed, ParsedMessage::Hello));
    }

    #[test]
    fn test_should_parse_disconnect_message() {
        let json = r#"{"type":"disconnect","reason":"refresh_requested"}"#;
        let parsed = parse_message(json).expect("parse").expect("some");
        assert!(matches!(parsed, ParsedMessage::Disconnect));
    }

    #[test]
    fn test_should_parse_events_api_envelope() {
        let json = r#"{
            "envelope_id": "env-456",
            "type": "events_api",
            "payload": {"event": {"type": "message", "channel": "C1", "text": "hi"}}
        }"#;
        let parsed = parse_message(json).expect("parse").expect("some");
        match parsed {
            ParsedMessage::Envelope(env) => {
                assert_eq!(env.envelope_id, "env-456");
                assert_eq!(env.envelope_type, EnvelopeType::EventsApi);
                assert_eq!(env.payload["event"]["text"], "hi");
            }
            _ => panic!("Expected Envelope"),
        }
    }

    #[test]
    fn test_should_keep_non_event_envelopes_for_ack() {
        for kind in ["slash_commands", "interactive"] {
            let json = format!(r#"{{"envelope_id":"e1","type":"{kind}","payload":{{}}}}"#);
            let parsed = parse_message(&json).expect("parse").expect("some");
            assert!(matches!(
                parsed,
                ParsedMessage::Envelope(Envelope {
                    envelope_type: EnvelopeType::Other,
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_should_return_none_for_unknown_type() {
        let parsed = parse_message(r#"{"type":"unknown_type"}"#).expect("parse");
        assert!(parsed.is_none());
    }

    #[test]
    fn test_should_skip_envelope_without_id() {
        let parsed = parse_message(r#"{"type":"events_api","payload":{}}"#).expect("parse");
        assert!(parsed.is_none());
    }

    #[test]
    fn test_should_error_on_invalid_json() {
        let result = parse_message("not json");
        assert!(result.unwrap_err().to_string().contains("Bad JSON"));
    }

    #[test]
    fn test_should_handle_null_payload() {
        let json = r#"{"envelope_id":"e1","type":"events_api"}"#;
        match parse_message(json).expect("parse").expect("some") {
            ParsedMessage::Envelope(env) => assert!(env.payload.is_null()),
            _ => panic!("Expected Envelope"),
        }
    }

    #[test]
    fn test_should_extract_channel_and_user_from_event() {
        let payload = serde_json::json!({"event": {"channel": "C67890", "user": "U1"}});
        assert_eq!(extract_channel(Some(&payload)), "C67890");
        assert_eq!(extract_user(Some(&payload)), "U1");
    }

    #[test]
    fn test_should_return_empty_ids_when_missing() {
        let payload = serde_json::json!({"other": "data"});
        assert_eq!(extract_channel(Some(&payload)), "");
        assert_eq!(extract_user(None), "");
    }
}
