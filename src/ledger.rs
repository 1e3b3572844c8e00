//! Durable record of votes this client considers cast.
//!
//! ```text
//! vote:{poll_id}:{identity_id}   → JSON VoteRecord
//! ```
//!
//! Both ids are percent-encoded, so a `:` inside either one cannot make two
//! different pairs share a key.
//!
//! Answers "has voted" instantly and offline. The ledger does not refuse a
//! second write for the same key; gating duplicate submissions is up to the
//! caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PollError, Result};
use crate::session;
use crate::storage::{SharedStore, StoreExt};

const VOTE_PREFIX: &str = "vote:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub option_id: String,
    pub voted_at: DateTime<Utc>,
}

pub fn vote_key(poll_id: &str, identity_id: &str) -> String {
    format!(
        "{}{}:{}",
        VOTE_PREFIX,
        urlencoding::encode(poll_id),
        urlencoding::encode(identity_id)
    )
}

/// Split a ledger key back into `(poll_id, identity_id)`.
fn parse_vote_key(key: &str) -> Option<(String, String)> {
    let (poll, identity) = key.strip_prefix(VOTE_PREFIX)?.split_once(':')?;
    let poll = urlencoding::decode(poll).ok()?;
    let identity = urlencoding::decode(identity).ok()?;
    Some((poll.into_owned(), identity.into_owned()))
}

#[derive(Clone)]
pub struct VoteLedger {
    store: SharedStore,
}

impl VoteLedger {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Whether the current identity has a recorded vote on `poll_id`.
    /// No identity, or an unreadable store, reads as "not voted".
    pub fn has_voted(&self, poll_id: &str) -> bool {
        let Some(identity) = session::current_identity(self.store.as_ref()) else {
            return false;
        };
        match self.store.get(&vote_key(poll_id, &identity.id)) {
            Ok(value) => value.is_some(),
            Err(e) => {
                tracing::warn!("Could not read ledger for poll {}: {}", poll_id, e);
                false
            }
        }
    }

    /// Record a vote for the current identity, replacing any earlier one.
    pub fn record_vote(&self, poll_id: &str, option_id: &str) -> Result<()> {
        let identity =
            session::current_identity(self.store.as_ref()).ok_or(PollError::Unauthenticated)?;
        self.record_vote_for(poll_id, &identity.id, option_id)
    }

    pub(crate) fn record_vote_for(
        &self,
        poll_id: &str,
        identity_id: &str,
        option_id: &str,
    ) -> Result<()> {
        let record = VoteRecord {
            option_id: option_id.to_string(),
            voted_at: Utc::now(),
        };
        self.store.set_json(&vote_key(poll_id, identity_id), &record)?;
        tracing::debug!("Ledger: {} voted {} on poll {}", identity_id, option_id, poll_id);
        Ok(())
    }

    /// The current identity's recorded choice on `poll_id`.
    pub fn vote_record(&self, poll_id: &str) -> Option<VoteRecord> {
        let identity = session::current_identity(self.store.as_ref())?;
        self.store
            .get_json(&vote_key(poll_id, &identity.id))
            .unwrap_or_else(|e| {
                tracing::warn!("Could not read ledger for poll {}: {}", poll_id, e);
                None
            })
    }

    /// Every recorded vote of `identity_id`, as `(poll_id, record)` pairs.
    pub fn records_for(&self, identity_id: &str) -> Result<Vec<(String, VoteRecord)>> {
        let mut records = Vec::new();
        for (key, bytes) in self.store.scan_prefix(VOTE_PREFIX)? {
            let Some((poll_id, owner)) = parse_vote_key(&key) else {
                tracing::warn!("Skipping unrecognised ledger key {}", key);
                continue;
            };
            if owner != identity_id {
                continue;
            }
            match serde_json::from_slice::<VoteRecord>(&bytes) {
                Ok(record) => records.push((poll_id, record)),
                Err(e) => tracing::warn!("Skipping corrupt ledger entry {}: {}", key, e),
            }
        }
        Ok(records)
    }
}
