//! HTTP transport for the remote classification service
//!
//! Speaks the chat-completions shape: system instructions + one user message,
//! JSON-object response format, answer in `choices[0].message.content`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use super::error::RemoteError;
use super::request::{AnalysisRequest, INSTRUCTIONS};

pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<String, RemoteError>> + Send + 'a>>;

/// One call to the remote service with one credential. Returns the raw
/// analysis text.
pub trait CompletionTransport: Send + Sync {
    fn provider(&self) -> &str;

    fn complete<'a>(&'a self, credential: &'a str, request: &'a AnalysisRequest) -> TransportFuture<'a>;
}

// ============================================================================
// HTTP
// ============================================================================

pub struct HttpTransport {
    endpoint: String,
    provider: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl HttpTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            provider: provider_name(endpoint),
            client,
        })
    }

    async fn send(&self, credential: &str, request: &AnalysisRequest) -> Result<String, RemoteError> {
        let body = json!({
            "model": request.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": INSTRUCTIONS },
                { "role": "user", "content": request.prompt()? },
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(credential)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(classify_status(status, retry_after));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RemoteError::Malformed("response has no message content".to_string()))
    }
}

impl CompletionTransport for HttpTransport {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn complete<'a>(&'a self, credential: &'a str, request: &'a AnalysisRequest) -> TransportFuture<'a> {
        Box::pin(self.send(credential, request))
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Maps a non-success HTTP status onto the retry taxonomy
pub fn classify_status(status: u16, retry_after: Option<Duration>) -> RemoteError {
    match status {
        429 => RemoteError::RateLimited { retry_after },
        401 | 403 => RemoteError::Unauthorized(status),
        500..=599 => RemoteError::Server(status),
        _ => RemoteError::Rejected(status),
    }
}

fn map_transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Network(err.to_string())
    }
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Host part of the endpoint, used as the provider key for usage counters
pub fn provider_name(endpoint: &str) -> String {
    let without_scheme = endpoint.split("://").nth(1).unwrap_or(endpoint);
    without_scheme
        .split(['/', ':'])
        .next()
        .filter(|h| !h.is_empty())
        .unwrap_or("remote")
        .to_string()
}
