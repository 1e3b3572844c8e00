//! The client facade: every component wired to one store and one gateway.
//!
//! A vote always lands in the ledger first. The remote submission is
//! attempted next, and when it fails the vote waits in the sync queue until a
//! later reconciliation pass gets it through.

use std::sync::Arc;

use serde::Serialize;

use crate::api::PollApi;
use crate::cache::PollCache;
use crate::config::Config;
use crate::error::{PollError, Result};
use crate::gateway::{HttpGateway, RemoteGateway};
use crate::identity::{IdentityProvider, LoginOutcome};
use crate::ledger::VoteLedger;
use crate::models::{NewPoll, Poll, PollResults, VoteCheck, VoteRequest};
use crate::queue::{PendingVote, SyncQueue};
use crate::session::Identity;
use crate::storage::{LocalStorage, SharedStore};

/// Where a vote submission ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    /// Accepted by the server on the first attempt.
    SubmittedRemote,
    /// Recorded locally, waiting in the sync queue.
    Queued,
    /// Accepted by the server during a later reconciliation pass.
    Synced,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteOutcome {
    pub success: bool,
    pub synced: bool,
    pub state: SubmissionState,
}

impl VoteOutcome {
    fn from_state(state: SubmissionState) -> Self {
        Self {
            success: true,
            synced: state != SubmissionState::Queued,
            state,
        }
    }
}

#[derive(Clone)]
pub struct PollClient {
    api: PollApi,
    identity: IdentityProvider,
    cache: PollCache,
    ledger: VoteLedger,
    queue: SyncQueue,
}

impl PollClient {
    pub fn new(gateway: Arc<dyn RemoteGateway>, store: SharedStore, config: &Config) -> Self {
        let api = PollApi::new(gateway, store.clone());
        Self {
            identity: IdentityProvider::new(
                api.clone(),
                store.clone(),
                config.identity.faculty.clone(),
            ),
            cache: PollCache::new(api.clone(), store.clone(), config.cache_ttl()),
            ledger: VoteLedger::new(store.clone()),
            queue: SyncQueue::new(store),
            api,
        }
    }

    /// Open the configured redb file and HTTP gateway.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let path = config.storage_path()?;
        let store: SharedStore = Arc::new(LocalStorage::open(&path)?);
        let gateway: Arc<dyn RemoteGateway> =
            Arc::new(HttpGateway::new(&config.server.base_url, config.server.timeout())?);
        tracing::debug!(
            "Using {} store at {} against {}",
            store.backend_name(),
            path.display(),
            config.server.base_url
        );
        Ok(Self::new(gateway, store, config))
    }

    pub fn identity(&self) -> &IdentityProvider {
        &self.identity
    }

    pub fn ledger(&self) -> &VoteLedger {
        &self.ledger
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    // ── Session ─────────────────────────────────────────────────────

    /// Log in (remotely if possible) and replay this identity's queued votes.
    pub async fn login(&self, candidate_id: &str) -> Result<LoginOutcome> {
        let mut outcome = self.identity.login(candidate_id).await?;
        outcome.synced = self.sync_pending_votes().await;
        Ok(outcome)
    }

    pub fn logout(&self) -> Result<()> {
        self.identity.logout()
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.identity.current_identity()
    }

    // ── Polls ───────────────────────────────────────────────────────

    pub async fn get_polls(&self) -> Vec<Poll> {
        self.cache.get_polls().await
    }

    pub async fn get_poll_by_id(&self, poll_id: &str) -> Option<Poll> {
        self.cache.get_poll_by_id(poll_id).await
    }

    pub async fn get_poll_results(&self, poll_id: &str) -> Option<PollResults> {
        self.cache.get_poll_results(poll_id).await
    }

    /// Create a poll. Online only: nothing is cached or queued, and every
    /// failure goes back to the caller.
    pub async fn create_poll(&self, poll: &NewPoll) -> Result<String> {
        let identity = self.current_identity().ok_or(PollError::Unauthenticated)?;
        if !identity.is_admin {
            return Err(PollError::Forbidden("creating polls".to_string()));
        }
        let poll = poll.normalized().map_err(PollError::Validation)?;
        let poll_id = self.api.create_poll(&poll).await?;
        tracing::info!("Created poll {} ({})", poll_id, poll.title);
        Ok(poll_id)
    }

    // ── Votes ───────────────────────────────────────────────────────

    pub fn has_voted(&self, poll_id: &str) -> bool {
        self.ledger.has_voted(poll_id)
    }

    /// Server-side vote check, falling back to the local ledger.
    pub async fn check_vote(&self, poll_id: &str) -> VoteCheck {
        match self.api.check_vote(poll_id).await {
            Ok(check) => check,
            Err(e) => {
                tracing::warn!("Vote check for poll {} unavailable, using ledger: {}", poll_id, e);
                VoteCheck {
                    has_voted: self.ledger.has_voted(poll_id),
                    poll_id: poll_id.to_string(),
                }
            }
        }
    }

    /// Cast a vote. Network trouble never fails the call; the vote is queued
    /// instead and `synced` comes back `false`.
    pub async fn vote(&self, poll_id: &str, option_id: &str) -> Result<VoteOutcome> {
        let identity = self.current_identity().ok_or(PollError::Unauthenticated)?;
        self.ledger.record_vote_for(poll_id, &identity.id, option_id)?;

        // Only the entry waiting now is superseded by this attempt. Anything
        // queued while the request is in flight is newer and must stay.
        let superseded = self.queue.entry_for(poll_id, &identity.id)?;
        let request = VoteRequest {
            poll_id: poll_id.to_string(),
            option_id: option_id.to_string(),
            student_id: identity.id.clone(),
        };

        match self.api.submit_vote(&request).await {
            Ok(()) => {
                if let Some(superseded) = superseded {
                    self.queue.remove_synced(&[superseded])?;
                }
                tracing::info!("Vote on poll {} accepted by server", poll_id);
                Ok(VoteOutcome::from_state(SubmissionState::SubmittedRemote))
            }
            Err(e) => {
                tracing::warn!("Vote on poll {} not delivered, queueing: {}", poll_id, e);
                self.queue.upsert(PendingVote::new(poll_id, option_id, &identity.id))?;
                Ok(VoteOutcome::from_state(SubmissionState::Queued))
            }
        }
    }

    /// Replay the current identity's queued votes in order. Each entry is
    /// tried independently; exactly the accepted ones leave the queue.
    /// Returns how many were accepted and never fails.
    pub async fn sync_pending_votes(&self) -> usize {
        let Some(identity) = self.current_identity() else {
            return 0;
        };

        let pending = match self.queue.pending_for(&identity.id) {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!("Could not read sync queue: {}", e);
                return 0;
            }
        };
        if pending.is_empty() {
            return 0;
        }

        let mut synced = Vec::new();
        for vote in pending {
            match self.api.submit_vote(&vote.to_request()).await {
                Ok(()) => {
                    tracing::debug!(
                        "Vote on poll {} now {:?}",
                        vote.poll_id,
                        SubmissionState::Synced
                    );
                    synced.push(vote);
                }
                Err(e) => tracing::warn!(
                    "Queued vote on poll {} still not delivered: {}",
                    vote.poll_id,
                    e
                ),
            }
        }

        if let Err(e) = self.queue.remove_synced(&synced) {
            tracing::warn!("Could not prune synced votes from queue: {}", e);
        }
        if !synced.is_empty() {
            tracing::info!("Synced {} queued vote(s)", synced.len());
        }
        synced.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::{Reply, ScriptedGateway};
    use crate::gateway::Method;
    use crate::queue::SYNC_QUEUE_KEY;
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use tokio::sync::Notify;

    fn setup() -> (Arc<ScriptedGateway>, SharedStore, PollClient) {
        let gateway = Arc::new(ScriptedGateway::offline());
        let store: SharedStore = Arc::new(MemoryStorage::new());
        let client = PollClient::new(gateway.clone(), store.clone(), &Config::default());
        (gateway, store, client)
    }

    fn accepted() -> Reply {
        Reply::Json(json!({"success": true}))
    }

    #[tokio::test]
    async fn test_offline_login_then_has_not_voted() {
        let (_gateway, _store, client) = setup();

        let outcome = client.login("S100").await.unwrap();

        assert!(outcome.is_local);
        let identity = client.current_identity().unwrap();
        assert_eq!(identity.id, "S100");
        assert!(identity.is_local_only);
        assert!(!client.has_voted("1"));
    }

    #[tokio::test]
    async fn test_vote_without_identity_has_no_side_effects() {
        let (gateway, store, client) = setup();

        let result = client.vote("1", "optA").await;

        assert!(matches!(result, Err(PollError::Unauthenticated)));
        assert!(gateway.calls().is_empty());
        assert!(store.get(SYNC_QUEUE_KEY).unwrap().is_none());
        assert!(store.scan_prefix("vote:").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vote_accepted_by_server() {
        let (gateway, _store, client) = setup();
        client.login("S100").await.unwrap();
        gateway.route(Method::POST, "/votes", accepted());

        let outcome = client.vote("1", "optA").await.unwrap();

        assert_eq!(
            outcome,
            VoteOutcome {
                success: true,
                synced: true,
                state: SubmissionState::SubmittedRemote
            }
        );
        assert!(client.has_voted("1"));
        assert!(client.queue().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_server_error_queues_then_sync_drains() {
        let (gateway, _store, client) = setup();
        client.login("S100").await.unwrap();
        gateway.route(Method::POST, "/votes", Reply::Status(500));

        let outcome = client.vote("1", "optA").await.unwrap();

        assert!(outcome.success);
        assert!(!outcome.synced);
        assert_eq!(outcome.state, SubmissionState::Queued);
        assert!(client.has_voted("1"));
        let pending = client.queue().snapshot().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].poll_id, "1");
        assert_eq!(pending[0].option_id, "optA");
        assert_eq!(pending[0].identity_id, "S100");

        gateway.route(Method::POST, "/votes", accepted());
        assert_eq!(client.sync_pending_votes().await, 1);
        assert!(client.queue().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_repeated_failed_votes_keep_one_entry_per_key() {
        let (_gateway, _store, client) = setup();
        client.login("S100").await.unwrap();

        for option in ["a", "b", "c", "d"] {
            client.vote("1", option).await.unwrap();
            client.vote("2", option).await.unwrap();
        }

        let pending = client.queue().snapshot().unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|v| v.option_id == "d"));
        assert_eq!(client.ledger().vote_record("1").unwrap().option_id, "d");
    }

    #[tokio::test]
    async fn test_concurrent_votes_on_same_key() {
        let (_gateway, _store, client) = setup();
        client.login("S100").await.unwrap();

        let (a, b) = tokio::join!(client.vote("1", "optA"), client.vote("1", "optB"));
        assert!(!a.unwrap().synced);
        assert!(!b.unwrap().synced);

        assert_eq!(client.queue().len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remote_success_clears_earlier_pending_entry() {
        let (gateway, _store, client) = setup();
        client.login("S100").await.unwrap();
        client.vote("1", "optA").await.unwrap();
        assert_eq!(client.queue().len().unwrap(), 1);

        gateway.route(Method::POST, "/votes", accepted());
        client.vote("1", "optB").await.unwrap();

        assert!(client.queue().is_empty().unwrap());
    }

    async fn wait_for_vote_posts(gateway: &ScriptedGateway, count: usize) {
        while gateway.calls_to(Method::POST, "/votes") < count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_vote_queued_during_sync_survives_it() {
        let (gateway, _store, client) = setup();
        client.login("S100").await.unwrap();
        client.vote("1", "optA").await.unwrap();

        let gate = Arc::new(Notify::new());
        gateway.route_once(
            Method::POST,
            "/votes",
            Reply::Held(gate.clone(), Box::new(accepted())),
        );

        // optA is on the wire when optB fails and gets queued
        let overlapping = async {
            wait_for_vote_posts(&gateway, 2).await;
            let outcome = client.vote("1", "optB").await.unwrap();
            gate.notify_one();
            outcome
        };
        let (synced, outcome) = tokio::join!(client.sync_pending_votes(), overlapping);

        assert_eq!(synced, 1);
        assert_eq!(outcome.state, SubmissionState::Queued);
        let pending = client.queue().snapshot().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].option_id, "optB");
        assert_eq!(client.ledger().vote_record("1").unwrap().option_id, "optB");
    }

    #[tokio::test]
    async fn test_slow_accepted_vote_keeps_newer_queued_vote() {
        let (gateway, _store, client) = setup();
        client.login("S100").await.unwrap();

        let gate = Arc::new(Notify::new());
        gateway.route_once(
            Method::POST,
            "/votes",
            Reply::Held(gate.clone(), Box::new(accepted())),
        );

        let overlapping = async {
            wait_for_vote_posts(&gateway, 1).await;
            let outcome = client.vote("1", "optB").await.unwrap();
            gate.notify_one();
            outcome
        };
        let (first, second) = tokio::join!(client.vote("1", "optA"), overlapping);

        assert_eq!(first.unwrap().state, SubmissionState::SubmittedRemote);
        assert_eq!(second.state, SubmissionState::Queued);
        let pending = client.queue().snapshot().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].option_id, "optB");
    }

    #[tokio::test]
    async fn test_partial_sync_removes_only_successes() {
        let (gateway, _store, client) = setup();
        client.login("S100").await.unwrap();
        for poll in ["1", "2", "3", "4", "5"] {
            client.vote(poll, "x").await.unwrap();
        }
        assert_eq!(client.queue().len().unwrap(), 5);

        // Replayed in queue order
        for reply in [
            accepted(),
            Reply::Status(500),
            accepted(),
            Reply::Offline,
            accepted(),
        ] {
            gateway.route_once(Method::POST, "/votes", reply);
        }

        assert_eq!(client.sync_pending_votes().await, 3);

        let left: Vec<String> = client
            .queue()
            .snapshot()
            .unwrap()
            .into_iter()
            .map(|v| v.poll_id)
            .collect();
        assert_eq!(left, vec!["2", "4"]);
    }

    #[tokio::test]
    async fn test_sync_with_nothing_queued() {
        let (gateway, _store, client) = setup();
        client.login("S100").await.unwrap();
        assert_eq!(client.sync_pending_votes().await, 0);
        assert_eq!(gateway.calls_to(Method::POST, "/votes"), 0);
    }

    #[tokio::test]
    async fn test_sync_without_identity_is_noop() {
        let (gateway, _store, client) = setup();
        client.login("S100").await.unwrap();
        client.vote("1", "a").await.unwrap();
        client.logout().unwrap();
        gateway.route(Method::POST, "/votes", accepted());

        assert_eq!(client.sync_pending_votes().await, 0);
        assert_eq!(client.queue().len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sync_only_replays_current_identity() {
        let (gateway, _store, client) = setup();
        client.login("S100").await.unwrap();
        client.vote("1", "a").await.unwrap();
        client.logout().unwrap();

        client.login("S200").await.unwrap();
        client.vote("1", "b").await.unwrap();

        gateway.route(Method::POST, "/votes", accepted());
        assert_eq!(client.sync_pending_votes().await, 1);

        let left = client.queue().snapshot().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].identity_id, "S100");
    }

    #[tokio::test]
    async fn test_login_replays_queue() {
        let (gateway, _store, client) = setup();
        client.login("S100").await.unwrap();
        client.vote("1", "a").await.unwrap();
        client.logout().unwrap();

        gateway.route(Method::POST, "/votes", accepted());
        let outcome = client.login("S100").await.unwrap();

        assert_eq!(outcome.synced, 1);
        assert!(client.queue().is_empty().unwrap());
        assert!(client.has_voted("1"));
    }

    #[tokio::test]
    async fn test_sync_sends_queued_payload() {
        let (gateway, _store, client) = setup();
        client.login("S100").await.unwrap();
        client.vote("7", "3").await.unwrap();
        gateway.route(Method::POST, "/votes", accepted());

        client.sync_pending_votes().await;

        let last = gateway.calls().pop().unwrap();
        assert_eq!(
            last.body,
            Some(json!({"poll_id": 7, "option_id": 3, "student_id": "S100"}))
        );
    }

    #[tokio::test]
    async fn test_check_vote_remote_and_fallback() {
        let (gateway, _store, client) = setup();
        client.login("S100").await.unwrap();
        gateway.route(
            Method::GET,
            "/votes/check/1",
            Reply::Json(json!({"has_voted": true, "poll_id": 1})),
        );
        assert!(client.check_vote("1").await.has_voted);

        gateway.go_offline();
        let check = client.check_vote("1").await;
        assert!(!check.has_voted);
        assert_eq!(check.poll_id, "1");

        client.vote("1", "a").await.unwrap();
        assert!(client.check_vote("1").await.has_voted);
    }

    #[tokio::test]
    async fn test_401_during_vote_tears_down_session_but_queues() {
        let (gateway, _store, client) = setup();
        client.login("S100").await.unwrap();
        gateway.route(Method::POST, "/votes", Reply::Status(401));

        let outcome = client.vote("1", "a").await.unwrap();

        assert_eq!(outcome.state, SubmissionState::Queued);
        assert!(client.current_identity().is_none());
        let pending = client.queue().snapshot().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].identity_id, "S100");
    }

    async fn admin_login(gateway: &ScriptedGateway, client: &PollClient) {
        gateway.route(
            Method::POST,
            "/auth/login",
            Reply::Json(json!({
                "access_token": "jwt-admin",
                "user": {"student_id": "A1", "name": "Dean", "is_admin": true}
            })),
        );
        client.login("A1").await.unwrap();
    }

    fn lunch_poll() -> NewPoll {
        NewPoll {
            title: "  Lunch ".to_string(),
            description: "Where to eat".to_string(),
            end_date: None,
            options: vec!["Pizza".to_string(), " ".to_string(), "Soup".to_string()],
        }
    }

    #[tokio::test]
    async fn test_admin_creates_poll() {
        let (gateway, _store, client) = setup();
        admin_login(&gateway, &client).await;
        gateway.route(
            Method::POST,
            "/polls",
            Reply::Json(json!({"success": true, "poll_id": 5})),
        );

        assert_eq!(client.create_poll(&lunch_poll()).await.unwrap(), "5");

        let sent = gateway.calls_to(Method::POST, "/polls");
        assert_eq!(sent, 1);
        let body = gateway.calls().pop().unwrap().body.unwrap();
        assert_eq!(body["title"], "Lunch");
        assert_eq!(body["options"], json!(["Pizza", "Soup"]));
        assert_eq!(body.get("end_date"), None);
    }

    #[tokio::test]
    async fn test_create_poll_requires_admin() {
        let (gateway, _store, client) = setup();

        assert!(matches!(
            client.create_poll(&lunch_poll()).await,
            Err(PollError::Unauthenticated)
        ));

        client.login("S100").await.unwrap();
        assert!(matches!(
            client.create_poll(&lunch_poll()).await,
            Err(PollError::Forbidden(_))
        ));
        assert_eq!(gateway.calls_to(Method::POST, "/polls"), 0);
    }

    #[tokio::test]
    async fn test_create_poll_validates_before_sending() {
        let (gateway, _store, client) = setup();
        admin_login(&gateway, &client).await;

        let mut poll = lunch_poll();
        poll.options = vec!["Only one".to_string(), "".to_string()];

        assert!(matches!(
            client.create_poll(&poll).await,
            Err(PollError::Validation(_))
        ));
        assert_eq!(gateway.calls_to(Method::POST, "/polls"), 0);
    }

    #[tokio::test]
    async fn test_create_poll_offline_fails_outward() {
        let (gateway, store, client) = setup();
        admin_login(&gateway, &client).await;

        let result = client.create_poll(&lunch_poll()).await;

        assert!(matches!(result, Err(PollError::NetworkUnreachable(_))));
        assert!(store.get(SYNC_QUEUE_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_results_is_none() {
        let (gateway, _store, client) = setup();
        gateway.route(Method::GET, "/polls/9/results", Reply::Status(404));
        assert!(client.get_poll_results("9").await.is_none());
    }
}
