//! Resolves who is voting.
//!
//! A login first tries the server. Whatever goes wrong there, the candidate
//! id still becomes a usable, locally improvised identity so voting works
//! offline.

use serde::Serialize;

use crate::api::PollApi;
use crate::error::{PollError, Result};
use crate::models::{LoginRequest, LoginResponse};
use crate::session::{self, Identity};
use crate::storage::SharedStore;

/// Result of [`IdentityProvider::login`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginOutcome {
    pub success: bool,
    pub identity: Identity,
    pub is_local: bool,
    /// Queued votes replayed right after the login.
    pub synced: usize,
}

#[derive(Clone)]
pub struct IdentityProvider {
    api: PollApi,
    store: SharedStore,
    faculty: String,
}

impl IdentityProvider {
    pub fn new(api: PollApi, store: SharedStore, faculty: impl Into<String>) -> Self {
        Self {
            api,
            store,
            faculty: faculty.into(),
        }
    }

    pub async fn login(&self, candidate_id: &str) -> Result<LoginOutcome> {
        let student_id = candidate_id.trim();
        if student_id.is_empty() {
            return Err(PollError::Validation("student id must not be empty".into()));
        }

        let request = LoginRequest {
            student_id: student_id.to_string(),
            name: default_display_name(student_id),
            faculty: self.faculty.clone(),
        };

        match self.api.login(&request).await {
            Ok(response) => {
                let identity = remote_identity(student_id, &response);
                session::save_session(
                    self.store.as_ref(),
                    &identity,
                    Some(&response.access_token),
                )?;
                tracing::info!("Logged in as {} (server session)", identity.id);
                Ok(LoginOutcome {
                    success: true,
                    identity,
                    is_local: false,
                    synced: 0,
                })
            }
            Err(e) => {
                tracing::warn!("Remote login failed, using local identity: {}", e);
                let identity = local_identity(student_id);
                session::save_session(self.store.as_ref(), &identity, None)?;
                Ok(LoginOutcome {
                    success: true,
                    identity,
                    is_local: true,
                    synced: 0,
                })
            }
        }
    }

    /// Clears identity, token and auth flag. Cached polls, the ledger and
    /// the sync queue stay; they are keyed by identity id.
    pub fn logout(&self) -> Result<()> {
        session::clear_session(self.store.as_ref())?;
        tracing::info!("Logged out");
        Ok(())
    }

    pub fn current_identity(&self) -> Option<Identity> {
        session::current_identity(self.store.as_ref())
    }

    pub fn is_authenticated(&self) -> bool {
        session::is_authenticated(self.store.as_ref())
    }

    pub fn token(&self) -> Option<String> {
        session::load_token(self.store.as_ref())
    }
}

fn default_display_name(student_id: &str) -> String {
    format!("Student {}", student_id)
}

fn local_identity(student_id: &str) -> Identity {
    Identity {
        id: student_id.to_string(),
        display_name: default_display_name(student_id),
        is_local_only: true,
        is_admin: false,
    }
}

fn remote_identity(student_id: &str, response: &LoginResponse) -> Identity {
    let id = response
        .user
        .student_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| student_id.to_string());
    let display_name = response
        .user
        .name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| default_display_name(&id));
    Identity {
        id,
        display_name,
        is_local_only: false,
        is_admin: response.user.is_admin,
    }
}
