pub mod client;
pub mod types;

pub use client::OpenAiCompletionClient;
pub use types::{ChatMessage, ChatMessageContent, ImageUrl, MessagePart, Role};
