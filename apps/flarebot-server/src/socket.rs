//! Socket Mode connection.
//!
//! [`SocketClient`] opens a WebSocket through `apps.connections.open`,
//! acknowledges every envelope as soon as it arrives, and hands it to the
//! caller's handler on a tracked task. Dropped connections are reopened
//! with exponential backoff until shutdown is signalled.

use std::future::Future;
use std::time::Duration;

use flarebot_api::SlackClient;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::dispatch::{self, Envelope, ParsedMessage};
use crate::error::ServerError;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnect delay: doubles per failure, capped, reset on a clean disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Backoff(Duration);

impl Backoff {
    fn new() -> Self {
        Self(INITIAL_BACKOFF)
    }

    /// Returns the current delay and doubles the next one.
    fn advance(&mut self) -> Duration {
        let current = self.0;
        self.0 = (self.0 * 2).min(MAX_BACKOFF);
        current
    }

    fn reset(&mut self) {
        self.0 = INITIAL_BACKOFF;
    }
}

/// Why a single connection ended.
#[derive(Debug, PartialEq, Eq)]
enum ConnectionExit {
    Shutdown,
    /// Slack asked us to reconnect, or the stream closed.
    Disconnect,
}

/// Socket Mode client bound to one app-level token.
pub struct SocketClient {
    app_token: String,
    slack: SlackClient,
}

impl std::fmt::Debug for SocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketClient")
            .field("slack", &self.slack)
            .finish_non_exhaustive()
    }
}

impl SocketClient {
    pub fn new(app_token: String, slack: SlackClient) -> Self {
        Self { app_token, slack }
    }

    /// Runs connections until `shutdown` flips to `true`.
    ///
    /// In-flight handler tasks are aborted on the way out.
    ///
    /// # Errors
    ///
    /// Connection failures are logged and retried, so this currently always
    /// returns `Ok`.
    pub async fn run<F, Fut>(
        &self,
        handler: F,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ServerError>
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut backoff = Backoff::new();
        let mut tasks = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self
                .connect_and_run(&handler, &mut shutdown, &mut tasks)
                .await
            {
                Ok(ConnectionExit::Shutdown) => break,
                Ok(ConnectionExit::Disconnect) => {
                    backoff.reset();
                    info!("Disconnected, reconnecting");
                }
                Err(e) => {
                    warn!(error = %e, "Connection error, reconnecting after backoff");
                }
            }

            let delay = backoff.advance();
            debug!(delay_secs = delay.as_secs(), "Waiting before reconnect");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Socket loop stopped");

        if !tasks.is_empty() {
            info!(task_count = tasks.len(), "Aborting in-flight handler tasks");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
        Ok(())
    }

    async fn connect_and_run<F, Fut>(
        &self,
        handler: &F,
        shutdown: &mut watch::Receiver<bool>,
        tasks: &mut JoinSet<()>,
    ) -> Result<ConnectionExit, ServerError>
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let url = self.slack.connections_open(&self.app_token).await?;
        let (ws, _response): (WsStream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ServerError::WebSocket(format!("WebSocket connect failed: {e}")))?;
        info!("Connected to Slack Socket Mode");

        let (mut write, mut read) = ws.split();
        loop {
            // Reap finished handlers so the set does not grow unbounded.
            while tasks.try_join_next().is_some() {}

            tokio::select! {
                frame = read.next() => {
                    let Some(frame) = frame else {
                        info!("WebSocket stream ended");
                        return Ok(ConnectionExit::Disconnect);
                    };
                    let frame = frame.map_err(|e| {
                        ServerError::WebSocket(format!("WebSocket read error: {e}"))
                    })?;

                    match frame {
                        WsMessage::Text(text) => match dispatch::parse_message(&text) {
                            Ok(Some(ParsedMessage::Envelope(envelope))) => {
                                let ack = serde_json::json!({ "envelope_id": &envelope.envelope_id });
                                write.send(WsMessage::Text(ack.to_string())).await.map_err(|e| {
                                    ServerError::WebSocket(format!("Ack send failed: {e}"))
                                })?;
                                tasks.spawn(handler(envelope));
                            }
                            Ok(Some(ParsedMessage::Disconnect)) => {
                                return Ok(ConnectionExit::Disconnect);
                            }
                            Ok(Some(ParsedMessage::Hello) | None) => {}
                            Err(e) => warn!(error = %e, "Dropping unparseable frame"),
                        },
                        WsMessage::Ping(data) => {
                            write.send(WsMessage::Pong(data)).await.map_err(|e| {
                                ServerError::WebSocket(format!("Pong send failed: {e}"))
                            })?;
                        }
                        WsMessage::Close(_) => {
                            info!("Received WebSocket close frame");
                            return Ok(ConnectionExit::Disconnect);
                        }
                        _ => {}
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let _ = write.send(WsMessage::Close(None)).await;
                        return Ok(ConnectionExit::Shutdown);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_not_leak_token_in_debug() {
        let socket = SocketClient::new(
            "xapp-1-secret".into(),
            SlackClient::new("xoxb-secret".into()),
        );
        let debug = format!("{socket:?}");
        assert!(debug.contains("SocketClient"));
        assert!(!debug.contains("xoxb-secret"));
        assert!(!debug.contains("xapp-1-secret"));
    }

    #[test]
    fn test_should_double_backoff_up_to_cap() {
        let mut backoff = Backoff::new();
        let sequence: Vec<u64> = (0..7).map(|_| backoff.advance().as_secs()).collect();
        assert_eq!(sequence, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_should_reset_backoff_after_clean_disconnect() {
        let mut backoff = Backoff::new();
        backoff.advance();
        backoff.advance();
        backoff.reset();
        assert_eq!(backoff.advance(), INITIAL_BACKOFF);
    }

    #[tokio::test]
    async fn test_should_return_immediately_when_already_shut_down() {
        let socket = SocketClient::new("xapp-1".into(), SlackClient::new("xoxb-1".into()));
        let (_tx, rx) = watch::channel(true);
        socket.run(|_envelope| async {}, rx).await.expect("run");
    }
}
