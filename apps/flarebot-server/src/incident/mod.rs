//! Incident commands.
//!
//! Every command is addressed to the bot by mention. Registration order is
//! match order: fire, incident lead, comms lead, the three transitions, help,
//! and finally a hidden catch-all that answers with help.

pub mod fire;
pub mod help;
pub mod history;
pub mod lead;
pub mod transition;

use std::sync::Arc;

use anyhow::Context;
use flarebot_core::{CoreError, Groups, Message, Router, Ticket, TrackerUser, incident_key};
use tracing::debug;

use crate::state::AppState;

/// Registers every incident command on `router`.
///
/// # Errors
///
/// Returns `CoreError::Pattern` if a command pattern fails to compile.
pub fn register(router: &Arc<Router>, state: &Arc<AppState>) -> Result<(), CoreError> {
    router.respond(
        fire::PATTERN,
        fire::EXAMPLE,
        fire::DESCRIPTION,
        with_state(state, fire::handle),
    )?;

    for role in [lead::Role::Incident, lead::Role::Comms] {
        let state = Arc::clone(state);
        router.respond(role.pattern(), role.example(), role.description(), move |msg, groups| {
            lead::handle(role, Arc::clone(&state), msg, groups)
        })?;
    }

    for target in transition::FlareTransition::ALL {
        let state = Arc::clone(state);
        router.respond(
            target.pattern(),
            target.example(),
            target.description(),
            move |msg, groups| transition::handle(target, Arc::clone(&state), msg, groups),
        )?;
    }

    let weak = Arc::downgrade(router);
    let help_state = Arc::clone(state);
    router.respond(
        help::PATTERN,
        help::EXAMPLE,
        help::DESCRIPTION,
        move |msg, groups| help::handle(weak.clone(), Arc::clone(&help_state), msg, groups),
    )?;

    let weak = Arc::downgrade(router);
    let fallback_state = Arc::clone(state);
    router.respond(r"(?s).*", "", "", move |msg, _groups| {
        help::fallback(weak.clone(), Arc::clone(&fallback_state), msg)
    })?;

    debug!(commands = router.commands().len(), "Incident commands registered");
    Ok(())
}

/// Adapts `f(state, msg, groups)` to the router's handler shape.
fn with_state<F, Fut>(
    state: &Arc<AppState>,
    f: F,
) -> impl Fn(Message, Groups) -> Fut + Send + Sync + 'static
where
    F: Fn(Arc<AppState>, Message, Groups) -> Fut + Send + Sync + 'static,
{
    let state = Arc::clone(state);
    move |msg, groups| f(Arc::clone(&state), msg, groups)
}

/// Slack link to a ticket.
pub(crate) fn ticket_link(ticket: &Ticket) -> String {
    format!("<{}|{}>", ticket.url, ticket.key)
}

/// Finds the flare ticket an incident channel belongs to.
///
/// Returns `Ok(None)` when the channel name does not carry the incident
/// prefix, when no ticket has that key, or when the ticket lives in another
/// project.
pub(crate) async fn resolve_incident(
    state: &AppState,
    channel_id: &str,
) -> Result<Option<Ticket>, CoreError> {
    let retry = state.retry();
    let info = retry
        .run("conversations.info", || state.chat().conversation_info(channel_id))
        .await?;
    let Some(key) = incident_key(&info.name, &state.settings().channel_prefix) else {
        return Ok(None);
    };

    match retry
        .run("jira.get_ticket", || state.tracker().get_ticket_by_key(&key))
        .await
    {
        Ok(ticket) if ticket.project_key == state.settings().project_key => Ok(Some(ticket)),
        Ok(ticket) => {
            debug!(key, project = ticket.project_key, "Ticket belongs to another project");
            Ok(None)
        }
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Returns whether the channel name carries the incident prefix.
pub(crate) async fn is_incident_channel(state: &AppState, channel_id: &str) -> bool {
    match state.chat().conversation_info(channel_id).await {
        Ok(info) => incident_key(&info.name, &state.settings().channel_prefix).is_some(),
        Err(e) => {
            debug!(channel_id, error = %e, "Could not look up channel");
            false
        }
    }
}

/// Maps a chat user to their tracker account through their email address.
pub(crate) async fn tracker_user_for(state: &AppState, user_id: &str) -> anyhow::Result<TrackerUser> {
    let retry = state.retry();
    let profile = retry
        .run("users.info", || state.chat().user_info(user_id))
        .await
        .context("Could not read your Slack profile")?;
    if profile.email.is_empty() {
        anyhow::bail!("your Slack profile has no email address");
    }
    let user = retry
        .run("jira.find_user", || {
            state.tracker().find_user_by_email(&profile.email)
        })
        .await
        .with_context(|| format!("No Jira user found for {}", profile.email))?;
    Ok(user)
}
