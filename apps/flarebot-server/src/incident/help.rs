//! `help` and the catch-all reply for unrecognised mentions.
//!
//! The help text depends on where it is asked: the flares channel lists the
//! commands for firing a flare, an incident channel lists the commands for
//! running one, and anywhere else (or `help all`) lists everything.

use std::sync::{Arc, Weak};

use flarebot_core::{CommandSummary, Groups, Message, Router};
use tracing::{debug, instrument};

use super::is_incident_channel;
use crate::state::AppState;

pub const PATTERN: &str = r"(?i)help\b\s*(all)?";
pub const EXAMPLE: &str = "help [all]";
pub const DESCRIPTION: &str = "Show the commands available here; `all` lists every command.";

/// Which commands a help reply covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Coordination,
    Incident,
    All,
}

impl Scope {
    fn includes(self, command: &CommandSummary) -> bool {
        if command.example.is_empty() {
            return false;
        }
        let coordination =
            command.example.starts_with("fire") || command.example.starts_with("help");
        match self {
            Self::Coordination => coordination,
            Self::Incident => !command.example.starts_with("fire"),
            Self::All => true,
        }
    }
}

#[instrument(skip_all, fields(channel = %msg.channel_id()))]
pub async fn handle(
    router: Weak<Router>,
    state: Arc<AppState>,
    msg: Message,
    groups: Groups,
) -> anyhow::Result<()> {
    let scope = if groups.get(1).is_some() {
        Scope::All
    } else {
        scope_for(&state, msg.channel_id()).await
    };
    let text = render(&router, &state, scope);
    state.say(msg.channel_id(), text)?;
    Ok(())
}

/// Replies to a mention no other command matched.
#[instrument(skip_all, fields(channel = %msg.channel_id()))]
pub async fn fallback(
    router: Weak<Router>,
    state: Arc<AppState>,
    msg: Message,
) -> anyhow::Result<()> {
    debug!(text = msg.text(), "Unrecognised command");
    let scope = scope_for(&state, msg.channel_id()).await;
    let text = format!(
        "Sorry! I didn't understand that. {}",
        render(&router, &state, scope)
    );
    state.say(msg.channel_id(), text)?;
    Ok(())
}

async fn scope_for(state: &AppState, channel_id: &str) -> Scope {
    if channel_id == state.settings().flares_channel_id {
        Scope::Coordination
    } else if is_incident_channel(state, channel_id).await {
        Scope::Incident
    } else {
        Scope::All
    }
}

fn render(router: &Weak<Router>, state: &AppState, scope: Scope) -> String {
    let heading = match scope {
        Scope::Coordination => format!(
            "Commands available in the <#{}|{}> channel:",
            state.settings().flares_channel_id,
            state.settings().flares_channel_name
        ),
        Scope::Incident => "Commands available in a Flare channel:".to_string(),
        Scope::All => "Commands I understand:".to_string(),
    };
    let commands = router.upgrade().map(|r| r.commands()).unwrap_or_default();

    let mut out = heading;
    for command in commands.iter().filter(|c| scope.includes(c)) {
        out.push_str(&format!(
            "\n• <@{}> {} - {}",
            state.bot_user_id(),
            command.example,
            command.description
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use flarebot_core::ChannelRecord;
    use flarebot_core::testing::FAKE_BOT_ID;

    use super::*;
    use crate::incident::register;
    use crate::state::test_support::*;

    fn wired() -> (Harness, Arc<Router>) {
        let chat = chat().with_channel(ChannelRecord {
            id: "CINC".into(),
            name: "flare-7".into(),
            created: 0,
            is_archived: false,
        });
        let h = harness_with(chat, tracker(), docs());
        let router = Arc::new(Router::new(FAKE_BOT_ID));
        register(&router, &h.state).expect("register");
        (h, router)
    }

    async fn ask(h: &mut Harness, router: &Arc<Router>, channel: &str, text: &str) -> String {
        let handled = router
            .dispatch(Message::new(AUTHOR, channel, text, "1.0"))
            .await;
        assert!(handled);
        let posts = Harness::posts_to(&h.drain(), channel);
        assert_eq!(posts.len(), 1, "exactly one reply");
        posts[0].clone()
    }

    #[tokio::test]
    async fn test_should_list_fire_commands_in_flares_channel() {
        let (mut h, router) = wired();
        let text = ask(&mut h, &router, FLARES, "<@UBOT> help").await;
        assert!(text.starts_with("Commands available in the <#C0FLARES|flares> channel:"));
        assert!(text.contains("<@UBOT> fire a flare p0|p1|p2"));
        assert!(!text.contains("i am incident lead"));
    }

    #[tokio::test]
    async fn test_should_list_incident_commands_in_flare_channel() {
        let (mut h, router) = wired();
        let text = ask(&mut h, &router, "CINC", "<@UBOT> help").await;
        assert!(text.starts_with("Commands available in a Flare channel:"));
        assert!(text.contains("• <@UBOT> i am incident lead - Declare yourself incident lead."));
        assert!(text.contains("flare mitigated"));
        assert!(!text.contains("fire a flare"));
    }

    #[tokio::test]
    async fn test_should_list_everything_when_asked_for_all() {
        let (mut h, router) = wired();
        let text = ask(&mut h, &router, FLARES, "<@UBOT> help all").await;
        assert!(text.starts_with("Commands I understand:"));
        assert!(text.contains("fire a flare"));
        assert!(text.contains("i am comms lead"));
        // Seven visible commands; the catch-all has no example.
        assert_eq!(text.lines().count(), 8);
    }

    #[tokio::test]
    async fn test_should_answer_unknown_mention_with_help() {
        let (mut h, router) = wired();
        let text = ask(&mut h, &router, "CGENERAL", "<@UBOT> make me a sandwich").await;
        assert!(text.starts_with("Sorry! I didn't understand that. Commands I understand:"));
    }

    #[tokio::test]
    async fn test_should_answer_bare_mention_with_help() {
        let (mut h, router) = wired();
        let text = ask(&mut h, &router, "CINC", "<@UBOT>").await;
        assert!(text.starts_with("Sorry! I didn't understand that. Commands available in a Flare channel:"));
    }

    #[tokio::test]
    async fn test_should_ignore_messages_without_mention() {
        let (mut h, router) = wired();
        let handled = router
            .dispatch(Message::new(AUTHOR, FLARES, "help", "1.0"))
            .await;
        assert!(!handled);
        assert!(h.drain().is_empty());
    }
}
