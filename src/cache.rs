//! Time-bounded local mirror of the poll list.
//!
//! Every successful list fetch replaces the cached entry wholesale. When the
//! server is unavailable the cached list stands in for it until it is older
//! than the TTL, after which callers get an empty list.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::api::PollApi;
use crate::models::{Poll, PollResults};
use crate::storage::{SharedStore, StoreExt};

pub const POLLS_CACHE_KEY: &str = "polls:cache";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub polls: Vec<Poll>,
    pub fetched_at_ms: i64,
}

impl CacheEntry {
    pub fn new(polls: Vec<Poll>) -> Self {
        Self {
            polls,
            fetched_at_ms: Utc::now().timestamp_millis(),
        }
    }

    fn is_fresh(&self, ttl: Duration, now_ms: i64) -> bool {
        let age = now_ms - self.fetched_at_ms;
        age >= 0 && (age as u128) < ttl.as_millis()
    }
}

#[derive(Clone)]
pub struct PollCache {
    api: PollApi,
    store: SharedStore,
    ttl: Duration,
}

impl PollCache {
    pub fn new(api: PollApi, store: SharedStore, ttl: Duration) -> Self {
        Self { api, store, ttl }
    }

    /// Poll list, remote first. Never fails: falls back to a fresh cache
    /// entry, then to an empty list.
    pub async fn get_polls(&self) -> Vec<Poll> {
        match self.api.list_polls().await {
            Ok(polls) => {
                self.store_polls(&polls);
                polls
            }
            Err(e) => {
                tracing::warn!("Poll list unavailable, using cache: {}", e);
                self.cached_polls()
            }
        }
    }

    /// Single poll, remote first. Falls back to a scan of the cached list,
    /// stale or not.
    pub async fn get_poll_by_id(&self, poll_id: &str) -> Option<Poll> {
        match self.api.get_poll(poll_id).await {
            Ok(poll) => Some(poll),
            Err(e) => {
                tracing::warn!("Poll {} unavailable, searching cache: {}", poll_id, e);
                self.load_entry()?
                    .polls
                    .into_iter()
                    .find(|poll| poll.id == poll_id)
            }
        }
    }

    /// Results are never cached; any failure, including 404, gives `None`.
    pub async fn get_poll_results(&self, poll_id: &str) -> Option<PollResults> {
        match self.api.poll_results(poll_id).await {
            Ok(results) => Some(results),
            Err(e) => {
                tracing::warn!("Results for poll {} unavailable: {}", poll_id, e);
                None
            }
        }
    }

    /// Cached list if still within the TTL, otherwise empty. No network.
    pub fn cached_polls(&self) -> Vec<Poll> {
        let now_ms = Utc::now().timestamp_millis();
        match self.load_entry() {
            Some(entry) if entry.is_fresh(self.ttl, now_ms) => entry.polls,
            Some(_) => {
                tracing::debug!("Poll cache expired");
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    fn store_polls(&self, polls: &[Poll]) {
        let entry = CacheEntry::new(polls.to_vec());
        match self.store.set_json(POLLS_CACHE_KEY, &entry) {
            Ok(()) => tracing::debug!("Cached {} polls", polls.len()),
            Err(e) => tracing::warn!("Could not cache polls: {}", e),
        }
    }

    fn load_entry(&self) -> Option<CacheEntry> {
        self.store
            .get_json(POLLS_CACHE_KEY)
            .unwrap_or_else(|e| {
                tracing::warn!("Could not read poll cache: {}", e);
                None
            })
    }
}
