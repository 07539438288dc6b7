//! Events API handler.
//!
//! Plain user messages are both recorded to the channel's history sheet and
//! offered to the command router. Edits, joins and other subtyped messages
//! are skipped, as are all non-message events.

use std::sync::Arc;

use flarebot_core::{Message, Router};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::incident::history::{self, HistoryEntry};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct EventsApiPayload {
    event: EventPayload,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum EventPayload {
    #[serde(rename = "message")]
    Message(MessageEvent),

    #[serde(other)]
    Other,
}

/// A `message` event.
#[derive(Debug, Deserialize)]
pub struct MessageEvent {
    pub channel: String,

    /// Absent for integration posts.
    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub text: String,

    pub ts: String,

    #[serde(default)]
    pub thread_ts: Option<String>,

    #[serde(default)]
    pub bot_id: Option<String>,

    /// `message_changed`, `channel_join`, ...; ordinary messages have none.
    #[serde(default)]
    pub subtype: Option<String>,
}

/// Handles an Events API envelope payload.
#[instrument(skip_all)]
pub async fn handle_event(state: Arc<AppState>, router: Arc<Router>, payload: serde_json::Value) {
    let payload: EventsApiPayload = match serde_json::from_value(payload) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Failed to parse events_api payload");
            return;
        }
    };

    match payload.event {
        EventPayload::Message(msg) => handle_message_event(&state, &router, msg).await,
        EventPayload::Other => debug!("Ignoring non-message event"),
    }
}

#[instrument(skip_all, fields(channel = %msg.channel, ts = %msg.ts))]
async fn handle_message_event(state: &AppState, router: &Router, msg: MessageEvent) {
    if let Some(subtype) = &msg.subtype {
        debug!(subtype, "Skipping message with subtype");
        return;
    }
    let Some(user) = msg.user.clone() else {
        debug!("Skipping message without author");
        return;
    };

    let from_self = user == state.bot_user_id();
    let from_other_bot = msg.bot_id.is_some() && !from_self;
    let message = Message::new(&user, &msg.channel, &msg.text, &msg.ts).with_self_origin(from_self);
    let entry = HistoryEntry {
        channel: msg.channel,
        user,
        ts: msg.ts,
        thread_ts: msg.thread_ts,
        text: msg.text,
    };

    let record = async {
        if let Err(e) = history::record(state, entry).await {
            warn!(error = %e, "Failed to record channel history");
        }
    };
    let route = async {
        if from_other_bot {
            debug!("Not routing message from another bot");
        } else {
            router.dispatch(message).await;
        }
    };
    tokio::join!(record, route);
}

#[cfg(test)]
mod tests {
    use flarebot_core::testing::FAKE_BOT_ID;
    use flarebot_core::{ChannelRecord, CoreError, PinnedMessage};

    use super::*;
    use crate::incident;
    use crate::state::test_support::*;

    fn wired() -> (Harness, Arc<Router>) {
        let chat = chat()
            .with_channel(ChannelRecord {
                id: "CINC".into(),
                name: "flare-7".into(),
                created: 0,
                is_archived: false,
            })
            .with_pin(
                "CINC",
                PinnedMessage {
                    text: history::intro_message(FAKE_BOT_ID, "sheet-7"),
                    author_id: FAKE_BOT_ID.into(),
                },
            );
        let h = harness_with(chat, tracker(), docs().with_spreadsheet("sheet-7"));
        let router = Arc::new(Router::new(FAKE_BOT_ID));
        incident::register(&router, &h.state).expect("register");
        (h, router)
    }

    fn event(fields: serde_json::Value) -> serde_json::Value {
        let mut event = serde_json::json!({
            "type": "message",
            "channel": "CINC",
            "user": AUTHOR,
            "text": "hello",
            "ts": "1700000000.000100",
        });
        if let (Some(base), Some(extra)) = (event.as_object_mut(), fields.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        serde_json::json!({ "event": event })
    }

    #[test]
    fn test_should_deserialize_message_event() {
        let payload: EventsApiPayload =
            serde_json::from_value(event(serde_json::json!({"thread_ts": "1.0"})))
                .expect("deserialize");
        match payload.event {
            EventPayload::Message(msg) => {
                assert_eq!(msg.channel, "CINC");
                assert_eq!(msg.user.as_deref(), Some(AUTHOR));
                assert_eq!(msg.thread_ts.as_deref(), Some("1.0"));
                assert!(msg.bot_id.is_none());
                assert!(msg.subtype.is_none());
            }
            _ => panic!("Expected Message event"),
        }
    }

    #[test]
    fn test_should_deserialize_unknown_event_type() {
        let json = serde_json::json!({
            "event": {"type": "reaction_added", "user": "U456", "reaction": "fire"}
        });
        let payload: EventsApiPayload = serde_json::from_value(json).expect("deserialize");
        assert!(matches!(payload.event, EventPayload::Other));
    }

    #[tokio::test]
    async fn test_should_record_and_route_user_message() {
        let (mut h, router) = wired();
        handle_event(
            h.state.clone(),
            router,
            event(serde_json::json!({"text": "<@UBOT> flare mitigated"})),
        )
        .await;

        let rows = h.docs.rows("sheet-7");
        assert_eq!(rows.len(), 1);
        // The bot has no profile, so its mention stays encoded.
        assert_eq!(rows[0][3], "<@UBOT> flare mitigated");
        // No FLARE-7 ticket exists, so the transition handler refuses.
        let posts = Harness::posts_to(&h.drain(), "CINC");
        assert!(posts[0].starts_with("Sorry, I can only transition Flares"));
    }

    #[tokio::test]
    async fn test_should_skip_subtyped_messages() {
        let (mut h, router) = wired();
        handle_event(
            h.state.clone(),
            router,
            event(serde_json::json!({"subtype": "channel_join", "text": "<@UBOT> help"})),
        )
        .await;
        assert!(h.docs.rows("sheet-7").is_empty());
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn test_should_record_but_not_route_own_messages() {
        let (mut h, router) = wired();
        handle_event(
            h.state.clone(),
            router,
            event(serde_json::json!({"user": FAKE_BOT_ID, "bot_id": "B1", "text": "<@UBOT> help"})),
        )
        .await;
        assert_eq!(h.docs.rows("sheet-7").len(), 1);
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn test_should_route_even_when_history_fails() {
        let (mut h, router) = wired();
        h.docs.fail_next("append", CoreError::Http { status: 403, body: "denied".into() });
        handle_event(
            h.state.clone(),
            router,
            event(serde_json::json!({"text": "<@UBOT> help"})),
        )
        .await;
        let posts = Harness::posts_to(&h.drain(), "CINC");
        assert!(posts[0].starts_with("Commands available in a Flare channel:"));
    }
}
