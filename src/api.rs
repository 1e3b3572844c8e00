//! Typed poll API on top of [`RemoteGateway`].
//!
//! Attaches the stored bearer token, tears the local session down when the
//! server answers 401, and decodes responses into [`crate::models`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{PollError, Result};
use crate::gateway::{Method, RemoteGateway};
use crate::models::{
    CreatePollReply, LoginRequest, LoginResponse, NewPoll, Poll, PollResults, VoteCheck,
    VoteRequest,
};
use crate::session;
use crate::storage::SharedStore;

pub const LOGIN_PATH: &str = "/auth/login";
pub const POLLS_PATH: &str = "/polls";
pub const VOTES_PATH: &str = "/votes";

pub fn poll_path(poll_id: &str) -> String {
    format!("{}/{}", POLLS_PATH, urlencoding::encode(poll_id))
}

pub fn results_path(poll_id: &str) -> String {
    format!("{}/results", poll_path(poll_id))
}

pub fn vote_check_path(poll_id: &str) -> String {
    format!("{}/check/{}", VOTES_PATH, urlencoding::encode(poll_id))
}

#[derive(Clone)]
pub struct PollApi {
    gateway: Arc<dyn RemoteGateway>,
    store: SharedStore,
}

impl PollApi {
    pub fn new(gateway: Arc<dyn RemoteGateway>, store: SharedStore) -> Self {
        Self { gateway, store }
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        self.send(Method::POST, LOGIN_PATH, Some(request)).await
    }

    pub async fn list_polls(&self) -> Result<Vec<Poll>> {
        self.send::<(), _>(Method::GET, POLLS_PATH, None).await
    }

    pub async fn get_poll(&self, poll_id: &str) -> Result<Poll> {
        self.send::<(), _>(Method::GET, &poll_path(poll_id), None).await
    }

    pub async fn poll_results(&self, poll_id: &str) -> Result<PollResults> {
        self.send::<(), _>(Method::GET, &results_path(poll_id), None).await
    }

    /// Any 2xx counts as accepted; the response body is not inspected.
    pub async fn submit_vote(&self, request: &VoteRequest) -> Result<()> {
        let body = encode(request)?;
        self.call(Method::POST, VOTES_PATH, Some(body)).await?;
        Ok(())
    }

    pub async fn check_vote(&self, poll_id: &str) -> Result<VoteCheck> {
        self.send::<(), _>(Method::GET, &vote_check_path(poll_id), None).await
    }

    /// Returns the new poll's id. The server reports rejections as a 2xx
    /// with `success: false`; those come back as `Validation`.
    pub async fn create_poll(&self, poll: &NewPoll) -> Result<String> {
        let reply: CreatePollReply = self.send(Method::POST, POLLS_PATH, Some(poll)).await?;
        if !reply.success {
            let reason = reply
                .error
                .unwrap_or_else(|| "poll rejected by server".to_string());
            return Err(PollError::Validation(reason));
        }
        reply
            .poll_id
            .ok_or_else(|| PollError::MalformedResponse("poll_id missing".to_string()))
    }

    async fn send<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = body.map(encode).transpose()?;
        let value = self.call(method, path, body).await?;
        serde_json::from_value(value).map_err(|e| {
            tracing::warn!("Unexpected response shape from {}: {}", path, e);
            PollError::MalformedResponse(e.to_string())
        })
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let token = session::load_token(self.store.as_ref());
        let result = self
            .gateway
            .request(method, path, body, token.as_deref())
            .await;

        if matches!(result, Err(PollError::HttpStatus(401))) {
            tracing::warn!("Server rejected credentials on {}, clearing session", path);
            if let Err(e) = session::clear_session(self.store.as_ref()) {
                tracing::warn!("Could not clear session after 401: {}", e);
            }
        }
        result
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Value> {
    serde_json::to_value(body).map_err(|e| PollError::Validation(e.to_string()))
}
