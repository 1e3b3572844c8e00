//! Persisted session state: who is logged in, their token, and the auth flag.
//!
//! ```text
//! session:identity   → JSON Identity
//! session:token      → raw bearer token bytes
//! session:auth       → "true" while logged in
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::storage::{KvStore, StoreExt};

pub const IDENTITY_KEY: &str = "session:identity";
pub const TOKEN_KEY: &str = "session:token";
pub const AUTH_KEY: &str = "session:auth";

/// The local representation of who is voting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    /// Set when no remote session could be established.
    pub is_local_only: bool,
    /// Granted by the server at login. Local identities never have it.
    #[serde(default)]
    pub is_admin: bool,
}

pub fn load_identity(store: &dyn KvStore) -> Result<Option<Identity>> {
    store.get_json(IDENTITY_KEY)
}

/// Identity lookup for paths that must not fail. Storage errors read as
/// "nobody logged in".
pub fn current_identity(store: &dyn KvStore) -> Option<Identity> {
    load_identity(store).unwrap_or_else(|e| {
        tracing::warn!("Could not read session identity: {}", e);
        None
    })
}

pub fn load_token(store: &dyn KvStore) -> Option<String> {
    match store.get(TOKEN_KEY) {
        Ok(Some(bytes)) => String::from_utf8(bytes).ok().filter(|t| !t.is_empty()),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("Could not read session token: {}", e);
            None
        }
    }
}

pub fn is_authenticated(store: &dyn KvStore) -> bool {
    matches!(store.get(AUTH_KEY), Ok(Some(flag)) if flag == b"true")
}

/// Persist a session. A `None` token removes any stale one.
pub fn save_session(store: &dyn KvStore, identity: &Identity, token: Option<&str>) -> Result<()> {
    store.set_json(IDENTITY_KEY, identity)?;
    match token {
        Some(token) => store.set(TOKEN_KEY, token.as_bytes())?,
        None => store.remove(TOKEN_KEY)?,
    }
    store.set(AUTH_KEY, b"true")?;
    Ok(())
}

/// Remove identity, token and auth flag. Everything else is left alone.
pub fn clear_session(store: &dyn KvStore) -> Result<()> {
    store.remove(IDENTITY_KEY)?;
    store.remove(TOKEN_KEY)?;
    store.remove(AUTH_KEY)?;
    Ok(())
}
