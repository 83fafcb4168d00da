//! Dataset builder for instruction tuning
//!
//! Segments text documents into `{instruction, input, output}` records and
//! describes images into `{id, image_path, description}` records, using any
//! OpenAI-compatible chat-completion endpoint, then saves both as JSON
//! datasets.

pub mod ai;
pub mod app;
pub mod dataset;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod staging;

pub use error::{Error, Result};
