//! Error handling and custom error types
//!
//! Provides unified error handling across the application using thiserror.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Step of the text segmentation pipeline that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Analyze,
    Title,
    Format,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Analyze => "text analysis",
            PipelineStage::Title => "title generation",
            PipelineStage::Format => "formatting",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API request rejected (status {status}): {body}")]
    ClientRejected { status: u16, body: String },

    #[error("API server error (status {status}): {body}")]
    Server { status: u16, body: String },

    #[error("Malformed API response: {0}")]
    MalformedResponse(String),

    #[error("Reached maximum retries ({attempts}), last error: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    #[error("Invalid image {path}: {reason}")]
    InvalidImage { path: String, reason: String },

    #[error("All images failed:\n{0}")]
    BatchFailed(String),

    #[error("{stage} failed")]
    Pipeline {
        stage: PipelineStage,
        source: Box<Error>,
    },

    #[error("Invalid input {path}: {reason}")]
    InvalidInput { path: String, reason: String },

    #[error("No records to save")]
    NothingToSave,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invariant violation: {0}")]
    Invariant(String),
}

impl Error {
    /// Whether a completion attempt that failed with this error may be retried.
    ///
    /// 4xx responses mean bad credentials or a bad request and are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::Server { .. } | Error::Http(_) | Error::MalformedResponse(_)
        )
    }

    pub(crate) fn in_stage(self, stage: PipelineStage) -> Self {
        Error::Pipeline {
            stage,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
