//! Ordered outbound chat queue.
//!
//! Every post and pin goes through one unbounded channel drained by a single
//! consumer task, so the chat platform sees actions in exactly the order they
//! were enqueued, regardless of which handler enqueued them. Producers never
//! wait on the network.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::remote::ChatSender;
use crate::retry::RetryExecutor;
use crate::CoreError;

/// An outgoing chat action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    /// Post `text` to `channel`.
    Post { channel: String, text: String },
    /// Pin the recent message in `channel` whose text is exactly `text`.
    Pin { channel: String, text: String },
}

impl OutboundAction {
    fn channel(&self) -> &str {
        match self {
            Self::Post { channel, .. } | Self::Pin { channel, .. } => channel,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Post { .. } => "post",
            Self::Pin { .. } => "pin",
        }
    }
}

/// An action tagged with its enqueue sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedAction {
    pub seq: u64,
    pub action: OutboundAction,
}

/// Delivery counts reported when the consumer exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboundStats {
    pub delivered: u64,
    pub failed: u64,
}

/// Creates a connected producer handle and consumer.
pub fn channel() -> (OutboundHandle, OutboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = OutboundHandle {
        tx,
        next_seq: Arc::new(AtomicU64::new(1)),
    };
    (handle, OutboundReceiver { rx })
}

/// Cloneable producer side of the queue.
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    tx: mpsc::UnboundedSender<QueuedAction>,
    next_seq: Arc<AtomicU64>,
}

impl OutboundHandle {
    /// Enqueues an action and returns its sequence number.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::QueueClosed` once the consumer has shut down.
    pub fn enqueue(&self, action: OutboundAction) -> Result<u64, CoreError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.tx
            .send(QueuedAction { seq, action })
            .map_err(|_| CoreError::QueueClosed)?;
        Ok(seq)
    }

    /// Enqueues a post.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::QueueClosed` once the consumer has shut down.
    pub fn post(&self, channel: &str, text: impl Into<String>) -> Result<u64, CoreError> {
        self.enqueue(OutboundAction::Post {
            channel: channel.to_string(),
            text: text.into(),
        })
    }

    /// Enqueues a pin-by-text.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::QueueClosed` once the consumer has shut down.
    pub fn pin(&self, channel: &str, text: impl Into<String>) -> Result<u64, CoreError> {
        self.enqueue(OutboundAction::Pin {
            channel: channel.to_string(),
            text: text.into(),
        })
    }

    /// Returns `true` once the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the queue. Exactly one exists per queue.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::UnboundedReceiver<QueuedAction>,
}

impl OutboundReceiver {
    /// Takes the next queued action without waiting.
    pub fn try_recv(&mut self) -> Option<QueuedAction> {
        self.rx.try_recv().ok()
    }

    /// Delivers actions in order until shutdown is signalled or every
    /// producer has been dropped.
    ///
    /// On shutdown the queue stops accepting new actions, the backlog is
    /// delivered, and the consumer returns. Each delivery runs through
    /// `retry`; a failed delivery is logged with its sequence number and the
    /// consumer moves on to the next action.
    pub async fn run(
        mut self,
        sender: Arc<dyn ChatSender>,
        retry: RetryExecutor,
        mut shutdown: watch::Receiver<bool>,
    ) -> OutboundStats {
        let mut stats = OutboundStats::default();

        loop {
            tokio::select! {
                biased;
                item = self.rx.recv() => {
                    match item {
                        Some(queued) => deliver(&*sender, &retry, queued, &mut stats).await,
                        None => {
                            debug!("All outbound producers dropped");
                            return stats;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.rx.close();
        let mut drained = 0u64;
        while let Some(queued) = self.rx.recv().await {
            deliver(&*sender, &retry, queued, &mut stats).await;
            drained += 1;
        }
        info!(
            drained,
            delivered = stats.delivered,
            failed = stats.failed,
            "Outbound queue drained"
        );
        stats
    }
}

async fn deliver(
    sender: &dyn ChatSender,
    retry: &RetryExecutor,
    queued: QueuedAction,
    stats: &mut OutboundStats,
) {
    let QueuedAction { seq, action } = queued;
    let operation = action.kind();
    let result = match &action {
        OutboundAction::Post { channel, text } => {
            retry
                .run(operation, || sender.post_message(channel, text))
                .await
        }
        OutboundAction::Pin { channel, text } => {
            retry
                .run(operation, || sender.pin_by_text(channel, text))
                .await
        }
    };

    match result {
        Ok(()) => {
            stats.delivered += 1;
            debug!(seq, kind = operation, channel = action.channel(), "Delivered");
        }
        Err(e) => {
            stats.failed += 1;
            warn!(
                seq,
                kind = operation,
                channel = action.channel(),
                error = %e,
                "Outbound delivery failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::retry::RetryPolicy;
    use crate::testing::{ChatCall, FakeChat};

    fn fast_retry() -> RetryExecutor {
        RetryExecutor::new(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            multiplier: 1,
            deadline: None,
        })
    }

    #[tokio::test]
    async fn test_should_assign_increasing_sequence_ids() {
        let (handle, _rx) = channel();
        let a = handle.post("C1", "one").expect("enqueue");
        let b = handle.clone().pin("C1", "one").expect("enqueue");
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_should_report_closed_queue() {
        let (handle, rx) = channel();
        drop(rx);
        assert!(handle.is_closed());
        assert!(matches!(
            handle.post("C1", "lost"),
            Err(CoreError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn test_should_deliver_in_enqueue_order_across_producers() {
        let chat = Arc::new(FakeChat::new());
        let (handle, rx) = channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut producers = Vec::new();
        for p in 0..8 {
            let handle = handle.clone();
            producers.push(tokio::spawn(async move {
                let mut sent = Vec::new();
                for i in 0..25 {
                    let text = format!("producer {p} message {i}");
                    let seq = handle.post("C1", text.clone()).expect("enqueue");
                    sent.push((text, seq));
                    tokio::task::yield_now().await;
                }
                sent
            }));
        }
        let consumer = tokio::spawn(rx.run(chat.clone(), fast_retry(), shutdown_rx));

        let mut seq_by_text = std::collections::HashMap::new();
        for p in producers {
            seq_by_text.extend(p.await.expect("producer"));
        }
        shutdown_tx.send(true).expect("signal");
        let stats = consumer.await.expect("consumer");
        assert_eq!(stats.delivered, 200);

        let delivered_seqs: Vec<u64> = chat
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                ChatCall::Post { text, .. } => seq_by_text.get(&text).copied(),
                _ => None,
            })
            .collect();
        assert_eq!(delivered_seqs.len(), 200);
        assert!(delivered_seqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_should_drain_backlog_on_shutdown() {
        let chat = Arc::new(FakeChat::new());
        let (handle, rx) = channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        for i in 0..10 {
            handle.post("C1", format!("msg {i}")).expect("enqueue");
        }
        shutdown_tx.send(true).expect("signal");
        let stats = rx.run(chat.clone(), fast_retry(), shutdown_rx).await;

        assert_eq!(stats.delivered, 10);
        assert!(handle.post("C1", "late").is_err());
    }

    #[tokio::test]
    async fn test_should_log_and_continue_when_pin_target_missing() {
        let chat = Arc::new(FakeChat::new());
        let (handle, rx) = channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        handle.pin("C1", "never posted").expect("enqueue");
        handle.post("C1", "intro").expect("enqueue");
        handle.pin("C1", "intro").expect("enqueue");
        drop(handle);

        let stats = rx.run(chat.clone(), fast_retry(), shutdown_rx).await;

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 2);
        assert!(chat.calls().contains(&ChatCall::Pin {
            channel: "C1".into(),
            text: "intro".into(),
        }));
    }
}
