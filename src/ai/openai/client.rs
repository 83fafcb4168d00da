use super::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
use crate::ai::retry::{retry_with, RetryPolicy};
use crate::ai::{CompletionRequest, CompletionService};
use crate::models::{Config, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const PROBE_MAX_TOKENS: u32 = 5;

/// Client for any OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct OpenAiCompletionClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl OpenAiCompletionClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self::new_with_client(api_key, model, Client::new())
    }

    pub fn new_with_client(api_key: String, model: String, client: Client) -> Self {
        Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    /// Build a client from runtime configuration. Fails when no API key is set.
    pub fn from_config(config: &Config, client: Client) -> Result<Self> {
        let model = if config.model.trim().is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            config.model.clone()
        };

        Ok(
            Self::new_with_client(config.require_api_key()?.to_string(), model, client)
                .with_base_url(config.base_url.clone())
                .with_timeout(config.timeout)
                .with_retry_policy(RetryPolicy::new(config.max_retries)),
        )
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send_once(&self, messages: &[ChatMessage], max_tokens: Option<u32>) -> Result<String> {
        let url = format!("{}{}", self.base_url, CHAT_COMPLETIONS_PATH);
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens,
            stream: false,
        };

        tracing::debug!("Making request to: {}", url);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::error!("Completion API error (status {}): {}", status, error_text);
            return Err(if status.is_client_error() {
                Error::ClientRejected {
                    status: status.as_u16(),
                    body: error_text,
                }
            } else {
                Error::Server {
                    status: status.as_u16(),
                    body: error_text,
                }
            });
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        tracing::debug!("Raw API response: {}", body);
        extract_content(&body)
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.timeout)
        } else {
            tracing::error!("Failed to send completion request: {}", e);
            Error::Http(e)
        }
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let messages = request.messages.as_slice();
        let max_tokens = request.max_tokens;

        retry_with(&self.retry, "Chat completion", |_| {
            self.send_once(messages, max_tokens)
        })
        .await
    }

    /// Single attempt, no retry: a bad key or URL should fail fast.
    async fn probe(&self) -> Result<()> {
        tracing::debug!("Probing {} with model {}", self.base_url, self.model);
        let messages = [ChatMessage::user("Hello")];
        self.send_once(&messages, Some(PROBE_MAX_TOKENS)).await?;
        Ok(())
    }
}

/// Pull `choices[0].message.content` out of a response body, trimmed.
pub(crate) fn extract_content(body: &str) -> Result<String> {
    let response: ChatCompletionResponse = serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        tracing::error!("Failed to parse completion response: {}\nBody: {}", e, body);
        Error::MalformedResponse(format!(
            "response is not valid JSON, check the API base URL: {}",
            preview
        ))
    })?;

    let choice = response
        .choices
        .and_then(|choices| choices.into_iter().next())
        .ok_or_else(|| Error::MalformedResponse("response is missing choices".to_string()))?;
    if choice.finish_reason.as_deref() == Some("length") {
        tracing::warn!("Completion hit the token limit; reply is truncated");
    }
    let message = choice
        .message
        .ok_or_else(|| Error::MalformedResponse("response is missing message".to_string()))?;
    let content = message
        .content
        .ok_or_else(|| Error::MalformedResponse("response is missing content".to_string()))?;

    Ok(content.trim().to_string())
}
