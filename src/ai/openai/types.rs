//! OpenAI-compatible chat completion payloads.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Request body for `/v1/chat/completions`.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

/// Message content is either plain text or a list of typed parts.
///
/// Variant order matters for `#[serde(untagged)]` decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatMessageContent {
    Text(String),
    Parts(Vec<MessagePart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: ChatMessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: ChatMessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: ChatMessageContent::Text(text.into()),
        }
    }

    /// A user message carrying a text prompt followed by an inline image.
    pub fn user_with_image(text: impl Into<String>, image_url: String) -> Self {
        Self {
            role: Role::User,
            content: ChatMessageContent::Parts(vec![
                MessagePart::Text { text: text.into() },
                MessagePart::ImageUrl {
                    image_url: ImageUrl { url: image_url },
                },
            ]),
        }
    }

    /// Plain text of the message, if it has any.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            ChatMessageContent::Text(text) => Some(text),
            ChatMessageContent::Parts(parts) => parts.iter().find_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                MessagePart::ImageUrl { .. } => None,
            }),
        }
    }
}

/// Top-level chat completion response.
///
/// Every level is optional so a missing field can be reported precisely.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Option<Vec<ChatChoice>>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: Option<ResponseMessage>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    pub content: Option<String>,
}
