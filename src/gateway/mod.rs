//! Remote gateway abstraction.
//!
//! - [`HttpGateway`]: reqwest client against the poll server (default)
//!
//! The core never talks HTTP directly; it holds an `Arc<dyn RemoteGateway>`
//! and every remote call goes through [`RemoteGateway::request`].

pub mod http;

#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use serde_json::Value;

pub use http::HttpGateway;
pub use reqwest::Method;

use crate::error::Result;

/// A single JSON request/response exchange with the poll server.
///
/// Implementations map failures onto the remote variants of
/// [`PollError`](crate::error::PollError):
/// - transport failure or timeout → `NetworkUnreachable`
/// - non-2xx status → `HttpStatus(code)`
/// - body that is not JSON → `MalformedResponse`
///
/// An empty 2xx body is returned as `Value::Null`.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Result<Value>;
}
