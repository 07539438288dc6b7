//! `i am incident lead` / `i am comms lead`.

use std::sync::Arc;

use flarebot_core::{Groups, Message, Ticket};
use tracing::{info, instrument};

use super::{resolve_incident, ticket_link, tracker_user_for};
use crate::state::AppState;

/// A role someone can claim in an incident channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Owns the ticket and directs the response.
    Incident,
    /// Handles external communications; stored in a custom ticket field.
    Comms,
}

impl Role {
    pub fn pattern(self) -> &'static str {
        match self {
            Self::Incident => r"(?i)(?:i\s+am|i'm|i’m)\s+(?:the\s+)?incident\s+lead\b",
            Self::Comms => r"(?i)(?:i\s+am|i'm|i’m)\s+(?:the\s+)?comms?\s+lead\b",
        }
    }

    pub fn example(self) -> &'static str {
        match self {
            Self::Incident => "i am incident lead",
            Self::Comms => "i am comms lead",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Incident => "Declare yourself incident lead.",
            Self::Comms => "Declare yourself comms lead.",
        }
    }

    fn noun(self) -> &'static str {
        match self {
            Self::Incident => "incident lead",
            Self::Comms => "comms lead",
        }
    }

    fn announcement(self, user_id: &str) -> String {
        match self {
            Self::Incident => format!(
                "Oh Captain My Captain! <@{user_id}> is now incident lead. \
                 Please confirm all actions with them."
            ),
            Self::Comms => format!(
                "Comms lead assigned! <@{user_id}> is now responsible for external communications."
            ),
        }
    }
}

/// Text of the reminder posted when nobody has claimed incident lead.
pub fn reminder_text(bot_user_id: &str) -> String {
    format!(
        "<!channel> Nobody has claimed incident lead yet. \
         Say `<@{bot_user_id}> {}` to take it.",
        Role::Incident.example()
    )
}

#[instrument(skip(state, msg, _groups), fields(channel = %msg.channel_id()))]
pub async fn handle(
    role: Role,
    state: Arc<AppState>,
    msg: Message,
    _groups: Groups,
) -> anyhow::Result<()> {
    let channel = msg.channel_id();
    let noun = role.noun();

    let ticket = match resolve_incident(&state, channel).await {
        Ok(Some(ticket)) => ticket,
        Ok(None) => {
            state.say(
                channel,
                format!(
                    "Sorry, I can only assign {noun}s in a channel that corresponds \
                     to a Flare issue in JIRA."
                ),
            )?;
            return Ok(());
        }
        Err(e) => {
            state.say(
                channel,
                format!("Sorry, I couldn't look up the Flare for this channel. Error: {e}"),
            )?;
            return Err(e.into());
        }
    };

    state.say(channel, format!("working on assigning {noun}...."))?;

    if let Err(e) = assign(role, &state, &ticket, msg.author_id()).await {
        state.say(
            channel,
            format!(
                "Sorry, I couldn't assign you as {noun}. Error: {e:#}. \
                 You can set it by hand on {}",
                ticket_link(&ticket)
            ),
        )?;
        return Err(e);
    }

    if role == Role::Incident && state.reminders().cancel(channel) {
        info!(key = ticket.key, "Incident lead reminder cancelled");
    }
    state.say(channel, role.announcement(msg.author_id()))?;
    Ok(())
}

async fn assign(role: Role, state: &AppState, ticket: &Ticket, author_id: &str) -> anyhow::Result<()> {
    let user = tracker_user_for(state, author_id).await?;
    let tracker = state.tracker();
    let retry = state.retry();
    match role {
        Role::Incident => {
            retry
                .run("jira.assign", || tracker.assign_ticket(&ticket.key, &user))
                .await?;
        }
        Role::Comms => {
            retry
                .run("jira.comms_lead", || tracker.set_comms_lead(&ticket.key, &user))
                .await?;
        }
    }
    info!(key = ticket.key, role = role.noun(), account = user.account_id, "Role assigned");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use flarebot_core::testing::{FakeTracker, TrackerCall};
    use flarebot_core::{ChannelRecord, CoreError, OutboundAction, TrackerUser};
    use regex::Regex;

    use super::*;
    use crate::state::test_support::*;

    fn incident_harness() -> Harness {
        let chat = chat().with_channel(ChannelRecord {
            id: "CINC".into(),
            name: "flare-7".into(),
            created: 0,
            is_archived: false,
        });
        let tracker = FakeTracker::new("FLARE")
            .with_ticket(Ticket {
                key: "FLARE-7".into(),
                url: "https://tracker.test/browse/FLARE-7".into(),
                project_id: "10000".into(),
                project_key: "FLARE".into(),
                summary: "db down".into(),
                assignee: None,
                labels: Vec::new(),
            })
            .with_user(TrackerUser {
                account_id: "acc-ada".into(),
                email: AUTHOR_EMAIL.into(),
                display_name: "Ada".into(),
            });
        harness_with(chat, tracker, docs())
    }

    fn msg(channel: &str) -> Message {
        Message::new(AUTHOR, channel, "<@UBOT> i am incident lead", "1.0")
    }

    #[test]
    fn test_should_match_role_phrasings() {
        let incident = Regex::new(Role::Incident.pattern()).expect("pattern");
        assert!(incident.is_match("i am incident lead"));
        assert!(incident.is_match("I'm the incident lead"));
        assert!(incident.is_match("i’m incident lead"));
        assert!(!incident.is_match("i am comms lead"));

        let comms = Regex::new(Role::Comms.pattern()).expect("pattern");
        assert!(comms.is_match("I am comm lead"));
        assert!(comms.is_match("i am the comms lead"));
    }

    #[tokio::test]
    async fn test_should_assign_incident_lead_and_cancel_reminder() {
        let mut h = incident_harness();
        h.state.reminders().schedule(
            "CINC",
            Duration::from_secs(600),
            OutboundAction::Post {
                channel: "CINC".into(),
                text: "nag".into(),
            },
        );

        handle(Role::Incident, h.state.clone(), msg("CINC"), Groups::default())
            .await
            .expect("handled");

        assert_eq!(
            h.tracker.ticket("FLARE-7").and_then(|t| t.assignee).as_deref(),
            Some(AUTHOR_EMAIL)
        );
        assert_eq!(h.state.reminders().pending(), 0);
        assert_eq!(
            Harness::posts_to(&h.drain(), "CINC"),
            vec![
                "working on assigning incident lead....".to_string(),
                format!(
                    "Oh Captain My Captain! <@{AUTHOR}> is now incident lead. \
                     Please confirm all actions with them."
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_should_set_comms_lead_field() {
        let mut h = incident_harness();
        handle(Role::Comms, h.state.clone(), msg("CINC"), Groups::default())
            .await
            .expect("handled");

        assert!(h.tracker.calls().contains(&TrackerCall::CommsLead {
            key: "FLARE-7".into(),
            account_id: "acc-ada".into(),
        }));
        let posts = Harness::posts_to(&h.drain(), "CINC");
        assert_eq!(
            posts.last().map(String::as_str),
            Some("Comms lead assigned! <@UADA> is now responsible for external communications.")
        );
    }

    #[tokio::test]
    async fn test_should_refuse_outside_incident_channel() {
        let mut h = incident_harness();
        handle(Role::Comms, h.state.clone(), msg("CGENERAL"), Groups::default())
            .await
            .expect("handled");

        assert_eq!(
            Harness::posts_to(&h.drain(), "CGENERAL"),
            vec![
                "Sorry, I can only assign comms leads in a channel that corresponds \
                 to a Flare issue in JIRA."
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_should_report_assignment_failure_with_link() {
        let mut h = incident_harness();
        h.tracker.fail_next(
            "assign",
            CoreError::Http {
                status: 400,
                body: "user cannot be assigned".into(),
            },
        );

        let result = handle(Role::Incident, h.state.clone(), msg("CINC"), Groups::default()).await;
        assert!(result.is_err());

        let posts = Harness::posts_to(&h.drain(), "CINC");
        let report = posts.last().expect("report");
        assert!(report.starts_with("Sorry, I couldn't assign you as incident lead."));
        assert!(report.contains("user cannot be assigned"));
        assert!(report.contains("<https://tracker.test/browse/FLARE-7|FLARE-7>"));
    }

    #[test]
    fn test_should_mention_claim_command_in_reminder() {
        let text = reminder_text("UBOT");
        assert!(text.starts_with("<!channel>"));
        assert!(text.contains("`<@UBOT> i am incident lead`"));
    }
}
