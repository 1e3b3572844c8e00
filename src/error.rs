use thiserror::Error;

/// Errors produced by the poll data layer.
///
/// Remote failures (`NetworkUnreachable`, `HttpStatus`, `MalformedResponse`)
/// are normally absorbed by the read and vote paths and replaced with a
/// local fallback. Callers only see `Unauthenticated`, `Validation` and
/// `Storage` from the public operations, except poll creation, which is
/// online-only and passes remote failures and `Forbidden` straight through.
#[derive(Error, Debug)]
pub enum PollError {
    #[error("server unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("server returned HTTP {0}")]
    HttpStatus(u16),

    #[error("malformed server response: {0}")]
    MalformedResponse(String),

    #[error("no identity is logged in")]
    Unauthenticated,

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("poll {0} not found")]
    NotFound(String),

    #[error("{0} requires an admin account")]
    Forbidden(String),

    #[error("local storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl PollError {
    /// True for failures caused by the remote side or the network.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            PollError::NetworkUnreachable(_)
                | PollError::HttpStatus(_)
                | PollError::MalformedResponse(_)
        )
    }
}

pub type Result<T, E = PollError> = std::result::Result<T, E>;
