use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{header, Client as HttpClient, Method};
use serde_json::Value;

use super::RemoteGateway;
use crate::error::{PollError, Result};

pub struct HttpGateway {
    base_url: String,
    http_client: HttpClient,
}

impl HttpGateway {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Result<Value> {
        let url = self.url(path);
        let mut request = self.http_client.request(method.clone(), &url);

        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(ref body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            tracing::debug!("{} {} failed: {}", method, url, e);
            PollError::NetworkUnreachable(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("{} {} returned {}", method, url, status);
            return Err(PollError::HttpStatus(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PollError::NetworkUnreachable(e.to_string()))?;

        parse_body(&bytes)
    }
}

fn parse_body(bytes: &[u8]) -> Result<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| PollError::MalformedResponse(e.to_string()))
}
