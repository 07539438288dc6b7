//! Cancellable delayed posts.
//!
//! A reminder is a spawned task that sleeps, then enqueues an outbound
//! action. Reminders are keyed (usually by channel ID); scheduling a new
//! reminder under an existing key cancels the old one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::outbound::{OutboundAction, OutboundHandle};

#[derive(Debug)]
struct Pending {
    id: u64,
    token: CancellationToken,
}

/// Registry of pending reminders.
#[derive(Debug, Clone)]
pub struct Reminders {
    outbound: OutboundHandle,
    pending: Arc<DashMap<String, Pending>>,
    next_id: Arc<AtomicU64>,
}

impl Reminders {
    pub fn new(outbound: OutboundHandle) -> Self {
        Self {
            outbound,
            pending: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Enqueues `action` after `delay` unless cancelled first.
    ///
    /// Replaces (and cancels) any reminder already pending under `key`.
    pub fn schedule(&self, key: &str, delay: Duration, action: OutboundAction) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        if let Some(previous) = self.pending.insert(
            key.to_string(),
            Pending {
                id,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }

        let outbound = self.outbound.clone();
        let pending = Arc::clone(&self.pending);
        let key = key.to_string();
        debug!(key, delay_secs = delay.as_secs(), "Reminder scheduled");

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    debug!(key, "Reminder cancelled");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            pending.remove_if(&key, |_, p| p.id == id);
            if let Err(e) = outbound.enqueue(action) {
                warn!(key, error = %e, "Dropping reminder");
            }
        });
    }

    /// Cancels the reminder pending under `key`. Returns `true` if there was one.
    pub fn cancel(&self, key: &str) -> bool {
        match self.pending.remove(key) {
            Some((_, p)) => {
                p.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of reminders that have neither fired nor been cancelled.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::{self, QueuedAction};

    fn post(text: &str) -> OutboundAction {
        OutboundAction::Post {
            channel: "C1".into(),
            text: text.into(),
        }
    }

    /// Pulls everything currently queued without blocking.
    fn drain(rx: &mut outbound::OutboundReceiver) -> Vec<QueuedAction> {
        let mut out = Vec::new();
        while let Some(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_enqueue_after_delay() {
        let (handle, mut rx) = outbound::channel();
        let reminders = Reminders::new(handle);

        reminders.schedule("C1", Duration::from_secs(60), post("who is lead?"));
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(reminders.pending(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let queued = drain(&mut rx);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].action, post("who is lead?"));
        assert_eq!(reminders.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_not_fire_after_cancel() {
        let (handle, mut rx) = outbound::channel();
        let reminders = Reminders::new(handle);

        reminders.schedule("C1", Duration::from_secs(60), post("who is lead?"));
        assert!(reminders.cancel("C1"));
        assert!(!reminders.cancel("C1"));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_replace_reminder_with_same_key() {
        let (handle, mut rx) = outbound::channel();
        let reminders = Reminders::new(handle);

        reminders.schedule("C1", Duration::from_secs(10), post("first"));
        reminders.schedule("C1", Duration::from_secs(20), post("second"));
        assert_eq!(reminders.pending(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let queued = drain(&mut rx);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].action, post("second"));
    }
}
