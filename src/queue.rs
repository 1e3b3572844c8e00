//! Durable queue of votes accepted locally but not yet confirmed by the server.
//!
//! Stored as one JSON array under `sync:queue`, in insertion order. There is
//! at most one entry per `(poll_id, identity_id)`: inserting for an existing
//! key drops the old entry and appends the new one.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::VoteRequest;
use crate::storage::{SharedStore, StoreExt};

pub const SYNC_QUEUE_KEY: &str = "sync:queue";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingVote {
    pub poll_id: String,
    pub option_id: String,
    pub identity_id: String,
    pub queued_at: DateTime<Utc>,
}

impl PendingVote {
    pub fn new(poll_id: &str, option_id: &str, identity_id: &str) -> Self {
        Self {
            poll_id: poll_id.to_string(),
            option_id: option_id.to_string(),
            identity_id: identity_id.to_string(),
            queued_at: Utc::now(),
        }
    }

    pub fn same_key(&self, other: &PendingVote) -> bool {
        self.is_for(&other.poll_id, &other.identity_id)
    }

    pub fn is_for(&self, poll_id: &str, identity_id: &str) -> bool {
        self.poll_id == poll_id && self.identity_id == identity_id
    }

    pub fn to_request(&self) -> VoteRequest {
        VoteRequest {
            poll_id: self.poll_id.clone(),
            option_id: self.option_id.clone(),
            student_id: self.identity_id.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SyncQueue {
    store: SharedStore,
}

impl SyncQueue {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Current queue contents, oldest first.
    pub fn snapshot(&self) -> Result<Vec<PendingVote>> {
        Ok(self
            .store
            .get_json::<Vec<PendingVote>>(SYNC_QUEUE_KEY)?
            .unwrap_or_default())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.snapshot()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.snapshot()?.is_empty())
    }

    pub fn pending_for(&self, identity_id: &str) -> Result<Vec<PendingVote>> {
        Ok(self
            .snapshot()?
            .into_iter()
            .filter(|vote| vote.identity_id == identity_id)
            .collect())
    }

    /// Insert `vote`, replacing any unsent entry for the same key.
    pub fn upsert(&self, vote: PendingVote) -> Result<()> {
        tracing::debug!(
            "Queueing vote {} on poll {} for {}",
            vote.option_id,
            vote.poll_id,
            vote.identity_id
        );
        self.store
            .update_json::<Vec<PendingVote>, _>(SYNC_QUEUE_KEY, move |current| {
                let mut queue = current.unwrap_or_default();
                queue.retain(|existing| !existing.same_key(&vote));
                queue.push(vote);
                Some(queue)
            })
    }

    /// The entry currently waiting for `(poll_id, identity_id)`, if any.
    pub fn entry_for(&self, poll_id: &str, identity_id: &str) -> Result<Option<PendingVote>> {
        Ok(self
            .snapshot()?
            .into_iter()
            .find(|vote| vote.is_for(poll_id, identity_id)))
    }

    /// Drop exactly the entries in `synced`. An entry that was replaced by a
    /// newer upsert after the snapshot was taken no longer matches and stays.
    pub fn remove_synced(&self, synced: &[PendingVote]) -> Result<()> {
        if synced.is_empty() {
            return Ok(());
        }
        self.retain(|existing| !synced.contains(existing))
    }

    fn retain<F: Fn(&PendingVote) -> bool>(&self, keep: F) -> Result<()> {
        self.store
            .update_json::<Vec<PendingVote>, _>(SYNC_QUEUE_KEY, |current| {
                let mut queue = current?;
                queue.retain(|vote| keep(vote));
                if queue.is_empty() {
                    None
                } else {
                    Some(queue)
                }
            })
    }
}
