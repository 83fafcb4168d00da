//! Chat-completion integration
//!
//! Every pipeline talks to the model through [`CompletionService`], which the
//! OpenAI-compatible HTTP client and the test mock both implement.

pub mod mime;
pub mod mock;
pub mod openai;
pub mod retry;

pub use mock::MockCompletionClient;
pub use openai::{ChatMessage, OpenAiCompletionClient};
pub use retry::RetryPolicy;

use crate::Result;
use async_trait::async_trait;

/// One chat request, built fresh per call.
///
/// Model and streaming flag are filled in by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            max_tokens: None,
        }
    }

    /// The common two-message shape: a system prompt and one user turn.
    pub fn with_system(system: &str, user: impl Into<String>) -> Self {
        Self::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Send one chat completion and return the trimmed assistant text.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;

    /// Connectivity check: a tiny "Hello" completion.
    async fn probe(&self) -> Result<()> {
        let request = CompletionRequest::new(vec![ChatMessage::user("Hello")]).with_max_tokens(5);
        self.complete(request).await.map(|_| ())
    }
}
