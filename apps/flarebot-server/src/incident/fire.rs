//! `fire a flare`: open a new incident.
//!
//! Firing creates the ticket, copies and fills the flare document and the
//! history spreadsheet, opens the incident channel, and announces it in the
//! coordination channel. A retroactive flare is filed already mitigated and
//! gets no incident-lead reminder. Any step failing stops the workflow and
//! is reported to the channel, with a link to the ticket once one exists.

use std::fmt;
use std::sync::{Arc, LazyLock};

use anyhow::Context;
use chrono::{DateTime, Utc};
use flarebot_core::{
    ChannelRecord, Doc, Groups, Message, OutboundAction, Ticket, channel_name_for_ticket,
};
use regex::Regex;
use tracing::{debug, info, instrument};

use super::{history, lead, ticket_link, tracker_user_for};
use crate::state::AppState;

pub const PATTERN: &str = r"(?i)fire\s+";
pub const EXAMPLE: &str = "fire a flare p0|p1|p2 [preemptive|retroactive] <title>";
pub const DESCRIPTION: &str = "Fire a new Flare with the given priority and title.";

/// Transition applied to every new flare ticket.
const START_PROGRESS: &str = "Start Progress";
/// Transition applied right away to retroactive flares.
const MITIGATE: &str = "Mitigate";

/// Priority and special type may come in either order; the title is last.
static FIRE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)fire\s+(?:a\s+)?(?:flare\s+)?(?:(pre[- ]?emptive|retroactive|p0|p1|p2)\s+)?(?:flare\s+)?(?:(pre[- ]?emptive|retroactive|p0|p1|p2)\s+)(?:flare\s+)?(.+)",
    )
    .ok()
});

/// A flare that is not a live incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Special {
    /// Announced quietly ahead of expected impact.
    Preemptive,
    /// Filed after the fact and immediately mitigated.
    Retroactive,
}

impl fmt::Display for Special {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Preemptive => "preemptive",
            Self::Retroactive => "retroactive",
        })
    }
}

/// A parsed `fire` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireRequest {
    /// 0, 1 or 2.
    pub priority: u8,
    pub special: Option<Special>,
    pub title: String,
}

enum Token {
    Priority(u8),
    Special(Special),
}

fn token(raw: &str) -> Option<Token> {
    let lower = raw.to_lowercase();
    match lower.as_str() {
        "p0" => Some(Token::Priority(0)),
        "p1" => Some(Token::Priority(1)),
        "p2" => Some(Token::Priority(2)),
        "retroactive" => Some(Token::Special(Special::Retroactive)),
        _ if lower.starts_with("pre") => Some(Token::Special(Special::Preemptive)),
        _ => None,
    }
}

/// Extracts priority, special type and title from a `fire` message.
///
/// Exactly one priority is required; at most one special type is allowed.
pub fn parse_fire(text: &str) -> Option<FireRequest> {
    let caps = FIRE_RE.as_ref()?.captures(text)?;
    let mut priority = None;
    let mut special = None;
    for raw in [caps.get(1), caps.get(2)].into_iter().flatten() {
        match token(raw.as_str())? {
            Token::Priority(p) if priority.is_none() => priority = Some(p),
            Token::Special(s) if special.is_none() => special = Some(s),
            _ => return None,
        }
    }

    let title = caps.get(3)?.as_str().trim();
    if title.is_empty() {
        return None;
    }
    Some(FireRequest {
        priority: priority?,
        special,
        title: title.to_string(),
    })
}

/// The documents created for a flare.
#[derive(Debug, Clone)]
struct FlareDocs {
    doc: Doc,
    history: Doc,
    history_title: String,
}

/// Handles `fire …` in the coordination channel.
#[instrument(skip_all, fields(channel = %msg.channel_id(), author = %msg.author_id()))]
pub async fn handle(state: Arc<AppState>, msg: Message, _groups: Groups) -> anyhow::Result<()> {
    let settings = state.settings();
    let channel = msg.channel_id();
    let bot = state.bot_user_id();

    if channel != settings.flares_channel_id {
        state.say(
            channel,
            format!(
                "Sorry! Flares can only be fired in <#{}|{}>.",
                settings.flares_channel_id, settings.flares_channel_name
            ),
        )?;
        return Ok(());
    }

    let Some(request) = parse_fire(msg.text()) else {
        state.say(
            channel,
            format!(
                "Sorry! I couldn't extract the priority and title from your message. \
                 Try `<@{bot}> {EXAMPLE}`."
            ),
        )?;
        return Ok(());
    };

    let announcement = match request.special {
        Some(special) => format!(
            "OK, let me quietly set up the Flare documents. Nobody freak out, this is {special}."
        ),
        None => "OK, let me get my flaregun".to_string(),
    };
    state.say(channel, announcement)?;

    match fire_flare(&state, &msg, &request).await {
        Ok(opened) => {
            info!(channel_id = opened.id, name = opened.name, "Flare fired");
            Ok(())
        }
        Err(e) => {
            state.say(
                channel,
                format!("Sorry! I couldn't finish firing the flare. {e:#}"),
            )?;
            Err(e)
        }
    }
}

async fn fire_flare(
    state: &AppState,
    msg: &Message,
    request: &FireRequest,
) -> anyhow::Result<ChannelRecord> {
    let retry = state.retry();
    let tracker = state.tracker();

    let assignee = tracker_user_for(state, msg.author_id())
        .await
        .context("Error looking up your Jira user")?;
    let ticket = retry
        .run("jira.create_ticket", || {
            tracker.create_ticket(request.priority, &request.title, &assignee)
        })
        .await
        .context("Error creating Jira issue")?;
    debug!(key = ticket.key, "Ticket created");

    let mut transitions = vec![START_PROGRESS];
    if request.special == Some(Special::Retroactive) {
        transitions.push(MITIGATE);
    }
    for name in transitions {
        retry
            .run("jira.transition", || tracker.do_transition(&ticket.key, name))
            .await
            .with_context(|| format!("Error moving {} to {name}", ticket_link(&ticket)))?;
    }

    let docs = create_documents(state, &ticket, request, Utc::now())
        .await
        .with_context(|| format!("Error creating the Flare documents for {}", ticket_link(&ticket)))?;

    let description = format!(
        "Flare doc: {}\nSlack history: {}",
        docs.doc.url, docs.history.url
    );
    retry
        .run("jira.set_description", || {
            tracker.set_description(&ticket.key, &description)
        })
        .await
        .with_context(|| format!("Error linking the documents on {}", ticket_link(&ticket)))?;

    let opened = open_channel(state, &ticket, request, &docs)
        .await
        .with_context(|| format!("Error creating the channel for {}", ticket_link(&ticket)))?;

    let audience = match request.special {
        Some(_) => format!("<@{}>", msg.author_id()),
        None => "<!channel>".to_string(),
    };
    state.say(
        msg.channel_id(),
        format!("{audience}: Flare fired. Please visit <#{}>", opened.id),
    )?;

    if request.special != Some(Special::Retroactive) {
        state.reminders().schedule(
            &opened.id,
            state.settings().lead_reminder_after,
            OutboundAction::Post {
                channel: opened.id.clone(),
                text: lead::reminder_text(state.bot_user_id()),
            },
        );
    }
    Ok(opened)
}

async fn create_documents(
    state: &AppState,
    ticket: &Ticket,
    request: &FireRequest,
    started: DateTime<Utc>,
) -> anyhow::Result<FlareDocs> {
    let retry = state.retry();
    let docs = state.docs();
    let settings = state.settings();

    let suffix = request
        .special
        .map(|s| format!(" ({s})"))
        .unwrap_or_default();
    let doc_title = format!("{}: {}{suffix}", ticket.key, request.title);
    let history_title = format!("{}: {}{suffix} (Slack History)", ticket.key, request.title);

    let doc = retry
        .run("drive.copy", || {
            docs.create_from_template(&doc_title, &settings.template_doc_id)
        })
        .await
        .context("Error copying the flare doc template")?;
    let history = retry
        .run("drive.copy", || {
            docs.create_from_template(&history_title, &settings.history_template_id)
        })
        .await
        .context("Error copying the history template")?;

    if settings.domain.is_empty() {
        debug!("No sharing domain configured, leaving documents private");
    } else {
        for created in [&doc, &history] {
            retry
                .run("drive.share", || {
                    docs.share_with_domain(&created.id, &settings.domain, "writer")
                })
                .await
                .context("Error sharing the flare documents")?;
        }
    }

    let template = retry
        .run("drive.export", || docs.get_doc_content(&doc.id))
        .await
        .context("Error reading the flare doc")?;
    let html = fill_template(
        &template,
        &ticket.key,
        started,
        &request.title,
        &history_sheet_url(&history.id),
        &history_title,
    );
    retry
        .run("drive.update", || docs.update_doc_content(&doc.id, &html))
        .await
        .context("Error filling in the flare doc")?;

    Ok(FlareDocs {
        doc,
        history,
        history_title,
    })
}

async fn open_channel(
    state: &AppState,
    ticket: &Ticket,
    request: &FireRequest,
    docs: &FlareDocs,
) -> anyhow::Result<ChannelRecord> {
    let retry = state.retry();
    let chat = state.chat();
    let name = channel_name_for_ticket(&ticket.key);

    let opened = retry
        .run("conversations.create", || chat.create_channel(&name))
        .await?;
    retry
        .run("conversations.setTopic", || {
            chat.set_topic(&opened.id, &request.title)
        })
        .await?;

    let intro = history::intro_message(state.bot_user_id(), &docs.history.id);
    state.say(&opened.id, intro.clone())?;
    state.pin(&opened.id, intro)?;
    state.say(&opened.id, links_message(state, ticket, docs))?;
    state.doc_ids().insert(&opened.id, &docs.history.id);
    Ok(opened)
}

fn links_message(state: &AppState, ticket: &Ticket, docs: &FlareDocs) -> String {
    let mut text = format!(
        "*Ticket:* {}\n*Flare doc:* <{}|{}>\n*Slack history:* <{}|{}>",
        ticket_link(ticket),
        docs.doc.url,
        ticket.key,
        history_sheet_url(&docs.history.id),
        docs.history_title,
    );
    if let Some(url) = &state.settings().resources_url {
        text.push_str(&format!("\n*Resources:* {url}"));
    }
    text
}

fn history_sheet_url(sheet_id: &str) -> String {
    format!("https://docs.google.com/spreadsheets/d/{sheet_id}")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Fills the first occurrence of each flare doc placeholder.
fn fill_template(
    html: &str,
    key: &str,
    started: DateTime<Utc>,
    summary: &str,
    history_url: &str,
    history_title: &str,
) -> String {
    let history_link = format!(
        r#"<a href="{history_url}">{}</a>"#,
        escape_html(history_title)
    );
    html.replacen("[FLARE-KEY]", key, 1)
        .replacen(
            "[START-DATE]",
            &started.format("%Y-%m-%d %H:%M UTC").to_string(),
            1,
        )
        .replacen("[SUMMARY]", &escape_html(summary), 1)
        .replacen("[HISTORY-DOC]", &history_link, 1)
}
