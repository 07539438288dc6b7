//! Channel → history sheet ID cache.
//!
//! Entries are filled lazily and may be lost at any time; a miss is always
//! recoverable by resolving the ID again from the channel's pinned intro
//! message. Channels that resolved to no sheet are remembered for a short
//! while so ordinary channels do not cost a lookup per message.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::CoreError;

/// How long a channel without a history sheet is remembered as such.
pub const DEFAULT_MISS_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct DocIdCache {
    entries: Arc<DashMap<String, String>>,
    misses: Arc<DashMap<String, Instant>>,
    miss_ttl: Duration,
}

impl Default for DocIdCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DocIdCache {
    pub fn new() -> Self {
        Self::with_miss_ttl(DEFAULT_MISS_TTL)
    }

    /// A zero `miss_ttl` disables negative caching.
    pub fn with_miss_ttl(miss_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            misses: Arc::new(DashMap::new()),
            miss_ttl,
        }
    }

    pub fn get(&self, channel_id: &str) -> Option<String> {
        self.entries.get(channel_id).map(|e| e.value().clone())
    }

    pub fn insert(&self, channel_id: &str, doc_id: &str) {
        self.misses.remove(channel_id);
        self.entries
            .insert(channel_id.to_string(), doc_id.to_string());
    }

    /// Forgets everything known about `channel_id`, e.g. after the sheet
    /// rejected a write.
    pub fn invalidate(&self, channel_id: &str) {
        self.entries.remove(channel_id);
        self.misses.remove(channel_id);
    }

    fn recently_missed(&self, channel_id: &str) -> bool {
        let age = self.misses.get(channel_id).map(|at| at.elapsed());
        match age {
            Some(age) if age < self.miss_ttl => true,
            Some(_) => {
                self.misses.remove(channel_id);
                false
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the cached ID, or runs `resolve` and caches its result.
    ///
    /// A `None` result is remembered for the miss TTL, during which `resolve`
    /// is not called again for that channel. No map guard is held while
    /// `resolve` runs, so two concurrent misses may both resolve; the later
    /// insert wins.
    ///
    /// # Errors
    ///
    /// Propagates the resolver's error. Nothing is cached in that case.
    pub async fn get_or_resolve<F, Fut>(
        &self,
        channel_id: &str,
        resolve: F,
    ) -> Result<Option<String>, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<String>, CoreError>>,
    {
        if let Some(hit) = self.get(channel_id) {
            return Ok(Some(hit));
        }
        if self.recently_missed(channel_id) {
            return Ok(None);
        }
        let resolved = resolve().await?;
        match &resolved {
            Some(doc_id) => self.insert(channel_id, doc_id),
            None if !self.miss_ttl.is_zero() => {
                self.misses.insert(channel_id.to_string(), Instant::now());
            }
            None => {}
        }
        Ok(resolved)
    }
}
