//! `flare mitigated`, `not a flare`, `flare unmitigated`.

use std::sync::Arc;

use flarebot_core::{Groups, Message};
use tracing::{info, instrument};

use super::{resolve_incident, ticket_link};
use crate::state::AppState;

/// A status change of the flare ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlareTransition {
    Mitigated,
    NotAFlare,
    Unmitigated,
}

impl FlareTransition {
    pub const ALL: [Self; 3] = [Self::Mitigated, Self::NotAFlare, Self::Unmitigated];

    pub fn pattern(self) -> &'static str {
        match self {
            Self::Mitigated => r"(?i)(?:flare\s+)?(?:is\s+)?mitigated?\b",
            Self::NotAFlare => r"(?i)(?:flare\s+)?(?:is\s+)?not\s+(?:a\s+)?flare\b",
            Self::Unmitigated => r"(?i)(?:flare\s+)?(?:is\s+)?unmitigated?\b",
        }
    }

    pub fn example(self) -> &'static str {
        match self {
            Self::Mitigated => "flare mitigated",
            Self::NotAFlare => "not a flare",
            Self::Unmitigated => "flare unmitigated",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Mitigated => "Mark the Flare mitigated.",
            Self::NotAFlare => "Mark the Flare not-a-flare.",
            Self::Unmitigated => "Put the Flare back in progress.",
        }
    }

    /// Tracker transition (or target status) to apply.
    pub fn tracker_name(self) -> &'static str {
        match self {
            Self::Mitigated => "Mitigated",
            Self::NotAFlare => "NotAFlare",
            Self::Unmitigated => "In Progress",
        }
    }

    fn reply(self) -> &'static str {
        match self {
            Self::Mitigated => {
                "The Flare was mitigated and there was much rejoicing throughout the land."
            }
            Self::NotAFlare => {
                "The Flare was not a Flare and there was much rejoicing throughout the land."
            }
            Self::Unmitigated => "UhOh! The Flare was unmitigated and the land is in chaos.",
        }
    }

    fn announcement(self, channel_id: &str) -> String {
        match self {
            Self::Mitigated => format!("<#{channel_id}> has been mitigated"),
            Self::NotAFlare => format!("turns out <#{channel_id}> is not a Flare"),
            Self::Unmitigated => {
                format!("<!channel> <#{channel_id}> has been unmitigated and is back in progress.")
            }
        }
    }
}

#[instrument(skip(state, msg, _groups), fields(channel = %msg.channel_id()))]
pub async fn handle(
    target: FlareTransition,
    state: Arc<AppState>,
    msg: Message,
    _groups: Groups,
) -> anyhow::Result<()> {
    let channel = msg.channel_id();
    let ticket = match resolve_incident(&state, channel).await {
        Ok(Some(ticket)) => ticket,
        Ok(None) => {
            state.say(
                channel,
                "Sorry, I can only transition Flares in a channel that corresponds \
                 to a Flare issue in JIRA.",
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

    let tracker = state.tracker();
    let name = target.tracker_name();
    if let Err(e) = state
        .retry()
        .run("jira.transition", || tracker.do_transition(&ticket.key, name))
        .await
    {
        state.say(
            channel,
            format!(
                "Error transitioning flare: {e}. You can manually transition the flare in Jira: {}",
                ticket_link(&ticket)
            ),
        )?;
        return Err(e.into());
    }
    info!(key = ticket.key, transition = name, "Flare transitioned");

    if target != FlareTransition::Unmitigated {
        state.reminders().cancel(channel);
    }
    state.say(channel, target.reply())?;
    state.say(
        &state.settings().flares_channel_id,
        target.announcement(channel),
    )?;
    Ok(())
}
