//! Flarebot server: an incident-response bot connected to Slack over Socket
//! Mode.
//!
//! Messages that mention the bot are routed to the incident commands (fire a
//! flare, take a lead role, transition the flare, help). Every message in an
//! incident channel is recorded to that flare's history spreadsheet. All
//! replies go through a single ordered outbound queue.

mod config;
mod dispatch;
mod error;
mod handlers;
mod incident;
mod socket;
mod state;

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use flarebot_api::{GoogleDocsClient, JiraClient, SlackClient};
use flarebot_core::{ChatSender, OutboundStats, RetryExecutor, Router, outbound};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::ServerError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("flarebot_server=info".parse()?),
        )
        .init();

    let config_path = config::default_config_path().context("Failed to determine config path")?;
    let config = config::ServerConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let slack = SlackClient::new(config.slack.bot_token.clone());
    let identity = slack
        .auth_test()
        .await
        .context("Slack rejected the bot token")?;
    info!(bot_user_id = identity.user_id, bot = identity.user, "Authenticated with Slack");

    let remote = state::Collaborators {
        chat: Arc::new(slack.clone()),
        tracker: Arc::new(JiraClient::new(config.jira.clone())),
        docs: Arc::new(GoogleDocsClient::new(config.google.access_token.clone())),
    };
    let retry = RetryExecutor::new(config.retry.policy());
    let (outbound, receiver) = outbound::channel();
    let app_state = Arc::new(state::AppState::new(
        remote,
        outbound,
        retry.clone(),
        identity.user_id.clone(),
        state::IncidentSettings::from_config(&config),
    ));

    let router = Arc::new(Router::new(identity.user_id));
    incident::register(&router, &app_state).context("Failed to register commands")?;
    info!(commands = router.commands().len(), "Commands registered");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_signal(shutdown_tx));

    // The queue outlives the socket loop so late replies still go out.
    let (outbound_stop, outbound_stop_rx) = watch::channel(false);
    let sender: Arc<dyn ChatSender> = Arc::new(slack.clone());
    let outbound_task = tokio::spawn(receiver.run(sender, retry, outbound_stop_rx));

    let socket = socket::SocketClient::new(config.slack.app_token.clone(), slack);
    let state_for_handler = Arc::clone(&app_state);
    let router_for_handler = Arc::clone(&router);
    info!("Starting Socket Mode connection");
    let socket_loop = socket.run(
        move |envelope| {
            let state = Arc::clone(&state_for_handler);
            let router = Arc::clone(&router_for_handler);
            async move {
                dispatch::dispatch(state, router, envelope).await;
            }
        },
        shutdown_rx,
    );
    drain_after(socket_loop, outbound_stop, outbound_task).await?;

    info!(
        pending_reminders = app_state.reminders().pending(),
        "Server shut down"
    );
    Ok(())
}

/// Runs `socket_loop` to completion, then stops the outbound queue and waits
/// for its backlog to be delivered.
async fn drain_after<S>(
    socket_loop: S,
    outbound_stop: watch::Sender<bool>,
    outbound_task: JoinHandle<OutboundStats>,
) -> anyhow::Result<()>
where
    S: Future<Output = Result<(), ServerError>>,
{
    let result = socket_loop.await;

    outbound_stop.send_replace(true);
    match outbound_task.await {
        Ok(stats) => info!(
            delivered = stats.delivered,
            failed = stats.failed,
            "Outbound queue stopped"
        ),
        Err(e) => warn!(error = %e, "Outbound task did not finish cleanly"),
    }
    result.context("Socket Mode event loop failed")
}

/// Flips `shutdown` on SIGINT or SIGTERM.
async fn wait_for_signal(shutdown: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM, only SIGINT will stop the server");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received SIGINT, shutting down");
    }

    shutdown.send_replace(true);
}
