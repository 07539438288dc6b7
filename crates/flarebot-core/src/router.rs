//! Command registry and first-match dispatch.
//!
//! The [`Router`] owns an ordered list of commands. Registration appends to
//! the list under a write lock; dispatch takes a read lock only long enough
//! to find the first matching pattern, then releases it before the handler
//! runs. Handlers are isolated: an `Err` is logged and a panic is caught, so
//! one bad handler never takes the event loop down.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use futures::FutureExt;
use futures::future::BoxFuture;
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::CoreError;
use crate::message::{Groups, Message};

/// Boxed handler as stored in the registry.
type Handler = Arc<dyn Fn(Message, Groups) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A registered command.
struct Command {
    pattern: Regex,
    example: String,
    description: String,
    handler: Handler,
}

/// Example text and description of a registered command, for help output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSummary {
    /// Pattern source the command was registered with.
    pub pattern: String,
    /// What a user would type, e.g. `fire a flare p1 <title>`.
    pub example: String,
    /// One-line description.
    pub description: String,
}

/// Ordered command registry.
///
/// # Examples
///
/// ```
/// use flarebot_core::Router;
///
/// let router = Router::new("UBOT");
/// router
///     .respond("ping", "ping", "Check the bot is alive", |_msg, _groups| async { Ok(()) })
///     .unwrap();
/// assert_eq!(router.commands()[0].example, "ping");
/// ```
pub struct Router {
    bot_user_id: String,
    commands: RwLock<Vec<Arc<Command>>>,
}

impl Router {
    /// Creates an empty router for a bot with the given user ID.
    pub fn new(bot_user_id: impl Into<String>) -> Self {
        Self {
            bot_user_id: bot_user_id.into(),
            commands: RwLock::new(Vec::new()),
        }
    }

    /// The bot identity used for self-message suppression.
    pub fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    /// Appends a command matched against the raw message text.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Pattern` if `pattern` is not a valid regex.
    pub fn register<F, Fut>(
        &self,
        pattern: &str,
        example: &str,
        description: &str,
        handler: F,
    ) -> Result<(), CoreError>
    where
        F: Fn(Message, Groups) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let pattern = Regex::new(pattern)?;
        let handler: Handler = Arc::new(move |msg, groups| handler(msg, groups).boxed());
        let command = Arc::new(Command {
            pattern,
            example: example.to_string(),
            description: description.to_string(),
            handler,
        });

        let mut commands = self.commands.write().unwrap_or_else(PoisonError::into_inner);
        debug!(
            pattern = command.pattern.as_str(),
            position = commands.len(),
            "Registered command"
        );
        commands.push(command);
        Ok(())
    }

    /// Appends a command that only matches when the message starts by
    /// mentioning the bot (`<@BOT> …` or `<@BOT>: …`). A bare mention is
    /// matched against `pattern` as empty text.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Pattern` if the combined pattern is invalid.
    pub fn respond<F, Fut>(
        &self,
        pattern: &str,
        example: &str,
        description: &str,
        handler: F,
    ) -> Result<(), CoreError>
    where
        F: Fn(Message, Groups) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let addressed = format!(
            r"^<@{}(?:\|[^>]*)?>:?(?:\s+|$){pattern}",
            regex::escape(&self.bot_user_id)
        );
        self.register(&addressed, example, description, handler)
    }

    /// Returns the registered commands in match order.
    pub fn commands(&self) -> Vec<CommandSummary> {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|c| CommandSummary {
                pattern: c.pattern.as_str().to_string(),
                example: c.example.clone(),
                description: c.description.clone(),
            })
            .collect()
    }

    /// Dispatches a message to the first command whose pattern matches.
    ///
    /// Returns `true` if a handler was invoked. Messages from the bot itself
    /// are never dispatched. Handler errors and panics are logged and
    /// swallowed.
    #[instrument(skip(self, message), fields(channel = %message.channel_id(), ts = %message.ts()))]
    pub async fn dispatch(&self, message: Message) -> bool {
        if message.from_self() || message.author_id() == self.bot_user_id {
            debug!("Skipping message from the bot itself");
            return false;
        }

        let matched = {
            let commands = self.commands.read().unwrap_or_else(PoisonError::into_inner);
            commands.iter().find_map(|cmd| {
                cmd.pattern
                    .captures(message.text())
                    .map(|caps| (Arc::clone(cmd), Groups::from_captures(&caps)))
            })
        };

        let Some((command, groups)) = matched else {
            debug!("No command matched");
            return false;
        };

        let pattern = command.pattern.as_str().to_string();
        debug!(pattern, "Dispatching to command");

        // The handler call itself may panic before it yields a future.
        let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| {
            (command.handler)(message, groups)
        })) {
            Ok(fut) => fut,
            Err(panic_info) => {
                warn!(pattern, error = panic_message(&*panic_info), "Command handler panicked");
                return true;
            }
        };

        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(pattern, error = %e, "Command handler failed");
            }
            Err(panic_info) => {
                warn!(pattern, error = panic_message(&*panic_info), "Command handler panicked");
            }
        }
        true
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("Router")
            .field("bot_user_id", &self.bot_user_id)
            .field("command_count", &count)
            .finish()
    }
}

/// Extracts a printable message from a panic payload.
fn panic_message(panic_info: &(dyn std::any::Any + Send)) -> &str {
    panic_info
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic_info.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
}
