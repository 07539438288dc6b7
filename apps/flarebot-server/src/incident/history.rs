//! Incident channel history, recorded row by row into the flare's history
//! spreadsheet.
//!
//! The spreadsheet ID travels in the intro message pinned when the channel
//! is opened. The doc-id cache holds it after the first lookup.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::DateTime;
use flarebot_core::{CoreError, incident_key};
use regex::{Captures, Regex};
use tracing::{debug, instrument, warn};

use crate::state::AppState;

/// First words of the pinned intro message.
pub const INTRO_PREFIX: &str = "Thank you for firing a flare!";

static SHEET_ID: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"docs\.google\.com/spreadsheets/d/([a-zA-Z0-9_-]+)").ok());

static MENTION: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"<@([A-Z0-9]+)>").ok());

/// The intro posted (and pinned) in a freshly opened incident channel.
pub fn intro_message(bot_user_id: &str, history_id: &str) -> String {
    format!(
        "{INTRO_PREFIX} This message is pinned to the channel.\n\
         Use this channel to coordinate the response. To take charge, say \
         `<@{bot_user_id}> i am incident lead`; for external communications, \
         `<@{bot_user_id}> i am comms lead`. Say `<@{bot_user_id}> help` to see \
         everything else I can do.\n\
         Slack history for this channel is recorded \
         <https://docs.google.com/spreadsheets/d/{history_id}|here>."
    )
}

/// A message to record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub channel: String,
    pub user: String,
    pub ts: String,
    /// Parent timestamp when the message is a thread reply.
    pub thread_ts: Option<String>,
    pub text: String,
}

/// Appends `entry` to the channel's history sheet.
///
/// Returns `Ok(false)` when the channel has no history sheet (the flares
/// channel, or any channel that is not an incident channel).
///
/// A cached sheet that no longer accepts rows is dropped and resolved again
/// from the pinned intro; the row goes to the newly resolved sheet.
///
/// # Errors
///
/// Returns the first chat or document error that stops the row from being
/// written.
#[instrument(skip_all, fields(channel = %entry.channel, ts = %entry.ts))]
pub async fn record(state: &AppState, entry: HistoryEntry) -> Result<bool, CoreError> {
    if entry.channel == state.settings().flares_channel_id {
        return Ok(false);
    }
    let sheet = state
        .doc_ids()
        .get_or_resolve(&entry.channel, || resolve_sheet(state, &entry.channel))
        .await?;
    let Some(sheet) = sheet else {
        debug!("No history sheet for channel");
        return Ok(false);
    };

    let mut text = expand_mentions(state, &entry.text).await;
    if let Some(parent) = &entry.thread_ts {
        if *parent != entry.ts {
            text = format!("(message_replied {parent}) {text}");
        }
    }
    let author = display_name(state, &entry.user).await;
    let row = vec![entry.ts.clone(), format_ts(&entry.ts), author, text];

    let err = match append(state, &sheet, &row).await {
        Ok(()) => return Ok(true),
        Err(e) if is_stale_sheet(&e) => e,
        Err(e) => return Err(e),
    };
    warn!(sheet, error = %err, "History sheet rejected the row, resolving it again");
    state.doc_ids().invalidate(&entry.channel);
    let fresh = state
        .doc_ids()
        .get_or_resolve(&entry.channel, || resolve_sheet(state, &entry.channel))
        .await?;
    match fresh {
        Some(fresh) if fresh != sheet => {
            append(state, &fresh, &row).await?;
            Ok(true)
        }
        _ => Err(err),
    }
}

async fn append(state: &AppState, sheet: &str, row: &[String]) -> Result<(), CoreError> {
    let docs = state.docs();
    state
        .retry()
        .run("sheets.append", || docs.append_sheet_row(sheet, row))
        .await?;
    debug!(sheet, "History row appended");
    Ok(())
}

/// The sheet is gone or the bot lost access to it.
fn is_stale_sheet(err: &CoreError) -> bool {
    err.is_not_found() || matches!(err, CoreError::Http { status: 403, .. })
}

/// Looks up the history sheet through the pinned intro message.
async fn resolve_sheet(state: &AppState, channel_id: &str) -> Result<Option<String>, CoreError> {
    let chat = state.chat();
    let retry = state.retry();
    let info = retry
        .run("conversations.info", || chat.conversation_info(channel_id))
        .await?;
    if incident_key(&info.name, &state.settings().channel_prefix).is_none() {
        return Ok(None);
    }

    let pins = retry
        .run("pins.list", || chat.list_pins(channel_id))
        .await?;
    let Some(re) = SHEET_ID.as_ref() else {
        return Ok(None);
    };
    Ok(pins
        .iter()
        .filter(|p| p.author_id == state.bot_user_id() && p.text.starts_with(INTRO_PREFIX))
        .find_map(|p| re.captures(&p.text).map(|c| c[1].to_string())))
}

/// Replaces `<@U…>` mentions with `@name`, leaving unknown users as they are.
async fn expand_mentions(state: &AppState, text: &str) -> String {
    let Some(re) = MENTION.as_ref() else {
        return text.to_string();
    };
    let mut names = HashMap::new();
    for caps in re.captures_iter(text) {
        let id = caps[1].to_string();
        if names.contains_key(&id) {
            continue;
        }
        if let Ok(profile) = state.chat().user_info(&id).await {
            names.insert(id, preferred_name(&profile.real_name, &profile.name));
        }
    }
    re.replace_all(text, |caps: &Captures<'_>| match names.get(&caps[1]) {
        Some(name) => format!("@{name}"),
        None => caps[0].to_string(),
    })
    .into_owned()
}

async fn display_name(state: &AppState, user_id: &str) -> String {
    match state.chat().user_info(user_id).await {
        Ok(profile) => preferred_name(&profile.real_name, &profile.name),
        Err(e) => {
            debug!(user_id, error = %e, "Could not resolve author name");
            user_id.to_string()
        }
    }
}

fn preferred_name(real_name: &str, name: &str) -> String {
    if real_name.is_empty() {
        name.to_string()
    } else {
        real_name.to_string()
    }
}

/// Renders a transport timestamp (`seconds.micros`) as UTC wall time.
fn format_ts(ts: &str) -> String {
    let secs = ts.split('.').next().and_then(|s| s.parse::<i64>().ok());
    match secs.and_then(|s| DateTime::from_timestamp(s, 0)) {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => ts.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use flarebot_core::testing::FAKE_BOT_ID;
    use flarebot_core::{ChannelRecord, PinnedMessage, UserProfile};

    use super::*;
    use crate::state::test_support::*;

    fn incident_chat() -> flarebot_core::testing::FakeChat {
        chat()
            .with_channel(ChannelRecord {
                id: "CINC".into(),
                name: "flare-7".into(),
                created: 0,
                is_archived: false,
            })
            .with_user(UserProfile {
                id: "UBOB".into(),
                name: "bob".into(),
                real_name: String::new(),
                email: String::new(),
            })
            .with_pin(
                "CINC",
                PinnedMessage {
                    text: intro_message(FAKE_BOT_ID, "sheet-7"),
                    author_id: FAKE_BOT_ID.into(),
                },
            )
    }

    fn entry(channel: &str, text: &str) -> HistoryEntry {
        HistoryEntry {
            channel: channel.into(),
            user: AUTHOR.into(),
            ts: "1700000000.000100".into(),
            thread_ts: None,
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn test_should_append_row_to_pinned_history_sheet() {
        let h = harness_with(incident_chat(), tracker(), docs().with_spreadsheet("sheet-7"));
        let recorded = record(&h.state, entry("CINC", "db is back")).await.expect("record");
        assert!(recorded);

        assert_eq!(
            h.docs.rows("sheet-7"),
            vec![vec![
                "1700000000.000100".to_string(),
                "2023-11-14 22:13:20 UTC".to_string(),
                "Ada Lovelace".to_string(),
                "db is back".to_string(),
            ]]
        );
        assert_eq!(h.state.doc_ids().get("CINC").as_deref(), Some("sheet-7"));
    }

    #[tokio::test]
    async fn test_should_expand_mentions_and_mark_thread_replies() {
        let h = harness_with(incident_chat(), tracker(), docs().with_spreadsheet("sheet-7"));
        let mut e = entry("CINC", "<@UBOB> can you check <@UGHOST>?");
        e.thread_ts = Some("1699999999.000001".into());
        record(&h.state, e).await.expect("record");

        let rows = h.docs.rows("sheet-7");
        assert_eq!(
            rows[0][3],
            "(message_replied 1699999999.000001) @bob can you check <@UGHOST>?"
        );
    }

    #[tokio::test]
    async fn test_should_use_cached_sheet_without_reading_pins() {
        let h = harness_with(incident_chat(), tracker(), docs().with_spreadsheet("cached"));
        h.state.doc_ids().insert("CINC", "cached");
        h.chat.fail_next("pins", CoreError::ChatApi("should_not_be_called".into()));

        assert!(record(&h.state, entry("CINC", "hi")).await.expect("record"));
        assert_eq!(h.docs.rows("cached").len(), 1);
    }

    #[tokio::test]
    async fn test_should_recover_from_deleted_cached_sheet() {
        let h = harness_with(incident_chat(), tracker(), docs().with_spreadsheet("sheet-7"));
        h.state.doc_ids().insert("CINC", "deleted-sheet");

        for _ in 0..2 {
            assert!(record(&h.state, entry("CINC", "still here")).await.expect("record"));
        }
        assert_eq!(h.docs.rows("sheet-7").len(), 2);
        assert_eq!(h.state.doc_ids().get("CINC").as_deref(), Some("sheet-7"));
    }

    #[tokio::test]
    async fn test_should_drop_sheet_when_access_is_revoked() {
        let h = harness_with(incident_chat(), tracker(), docs().with_spreadsheet("sheet-7"));
        h.state.doc_ids().insert("CINC", "unshared");
        h.docs.fail_next(
            "append",
            CoreError::Http {
                status: 403,
                body: "The caller does not have permission".into(),
            },
        );

        assert!(record(&h.state, entry("CINC", "hi")).await.expect("record"));
        assert_eq!(h.docs.rows("sheet-7").len(), 1);
    }

    #[tokio::test]
    async fn test_should_keep_cached_sheet_on_other_errors() {
        let h = harness_with(incident_chat(), tracker(), docs().with_spreadsheet("sheet-7"));
        h.state.doc_ids().insert("CINC", "sheet-7");
        h.docs.fail_next("append", CoreError::Validation("bad range".into()));

        assert!(record(&h.state, entry("CINC", "hi")).await.is_err());
        assert_eq!(h.state.doc_ids().get("CINC").as_deref(), Some("sheet-7"));
    }

    #[tokio::test]
    async fn test_should_skip_flares_and_ordinary_channels() {
        let h = harness_with(incident_chat(), tracker(), docs());
        assert!(!record(&h.state, entry(FLARES, "fire!")).await.expect("record"));
        assert!(!record(&h.state, entry("CGENERAL", "lunch?")).await.expect("record"));
        assert!(h.state.doc_ids().is_empty());
    }

    #[tokio::test]
    async fn test_should_look_up_ordinary_channel_once() {
        let h = harness_with(incident_chat(), tracker(), docs());
        assert!(!record(&h.state, entry("CGENERAL", "lunch?")).await.expect("record"));

        h.chat.fail_next("info", CoreError::ChatApi("should_not_be_called".into()));
        assert!(!record(&h.state, entry("CGENERAL", "tacos")).await.expect("record"));
    }

    #[tokio::test]
    async fn test_should_ignore_pins_by_other_users() {
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
                    text: intro_message(FAKE_BOT_ID, "forged"),
                    author_id: AUTHOR.into(),
                },
            );
        let h = harness_with(chat, tracker(), docs());
        assert!(!record(&h.state, entry("CINC", "hi")).await.expect("record"));
    }

    #[test]
    fn test_should_fall_back_to_raw_ts_when_unparseable() {
        assert_eq!(format_ts("not-a-ts"), "not-a-ts");
        assert_eq!(format_ts("0.000000"), "1970-01-01 00:00:00 UTC");
    }

    #[test]
    fn test_should_link_history_sheet_in_intro() {
        let intro = intro_message("UBOT", "abc_123");
        assert!(intro.starts_with(INTRO_PREFIX));
        assert!(intro.contains("docs.google.com/spreadsheets/d/abc_123|here>"));
        let found = SHEET_ID
            .as_ref()
            .and_then(|re| re.captures(&intro))
            .map(|c| c[1].to_string());
        assert_eq!(found.as_deref(), Some("abc_123"));
    }
}
