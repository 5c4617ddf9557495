//! Generation endpoint client.
//!
//! Endpoint selection and credentials are injected, never read from ambient
//! global state: two clients in one process can point at different endpoints
//! (or a local test fixture) without interfering.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::debug;

use super::ChunkSource;
use crate::config::EndpointConfig;
use crate::error::SyncError;

/// Supplies the bearer token for generation requests. `None` means the
/// deployment runs unauthenticated (local fixture).
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed token, the common case.
pub struct StaticCredentials(pub String);

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// No credentials at all.
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn bearer_token(&self) -> Option<String> {
        None
    }
}

/// One prior turn sent as request context.
#[derive(Debug, Clone, Serialize)]
pub struct TurnMessage {
    pub role: String,
    pub content: String,
}

impl TurnMessage {
    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.to_string(),
        }
    }
}

/// Issues turn requests against the generation endpoint and hands back the
/// chunked response body as a [`ChunkSource`].
pub struct GenerationClient {
    http: reqwest::Client,
    endpoint: EndpointConfig,
    credentials: Arc<dyn CredentialProvider>,
}

impl GenerationClient {
    pub fn new(endpoint: EndpointConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            credentials,
        }
    }

    /// Open one generation stream for the given prior turns.
    ///
    /// A 401/403 before any frame is a fatal [`SyncError::Denied`]; any other
    /// pre-frame failure (connection refused, non-2xx) is a recoverable
    /// [`SyncError::Transport`]. The per-turn timeout is owned by the caller,
    /// not by this client: wrap the whole turn in `tokio::time::timeout`
    /// with [`EndpointConfig::turn_timeout`] and cancel on expiry.
    pub async fn open_stream(&self, turns: &[TurnMessage]) -> Result<ResponseChunks, SyncError> {
        let url = format!("{}/v1/generate", self.endpoint.base_url);
        let body = json!({
            "model": self.endpoint.model,
            "max_tokens": self.endpoint.max_tokens,
            "stream": true,
            "messages": turns,
        });

        let mut request = self.http.post(&url).json(&body);
        if let Some(token) = self.credentials.bearer_token() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(SyncError::Denied);
        }
        if !status.is_success() {
            return Err(SyncError::Transport(format!(
                "generation endpoint returned {status}"
            )));
        }

        debug!(url = %url, model = %self.endpoint.model, "generation stream open");
        Ok(ResponseChunks { response })
    }
}

/// Chunk source backed by a live HTTP response body.
pub struct ResponseChunks {
    response: reqwest::Response,
}

#[async_trait::async_trait]
impl ChunkSource for ResponseChunks {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, SyncError> {
        // A mid-stream read failure is a transport error: the turn aborts
        // and whatever text already accumulated stays local, uncommitted.
        let chunk = self
            .response
            .chunk()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(chunk.map(|bytes| bytes.to_vec()))
    }
}
