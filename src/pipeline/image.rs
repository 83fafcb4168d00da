//! Image description pipeline.
//!
//! Each image is validated, inlined as a base64 data URL, and described by a
//! single completion call. Batches isolate per-image failures.

use crate::ai::mime::image_data_url;
use crate::ai::{ChatMessage, CompletionRequest, CompletionService};
use crate::models::ImageRecord;
use crate::{prompts, Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

const DESCRIPTION_MAX_TOKENS: u32 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFailure {
    pub id: u64,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub records: Vec<ImageRecord>,
    pub failures: Vec<ImageFailure>,
}

pub struct ImageDescriber {
    completion: Arc<dyn CompletionService>,
    default_prompt: String,
}

impl ImageDescriber {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self {
            completion,
            default_prompt: prompts::IMAGE_DESCRIPTION.to_string(),
        }
    }

    /// Describe one image. A missing or blank `prompt` uses the default prompt.
    pub async fn process_image(&self, path: &Path, prompt: Option<&str>) -> Result<String> {
        let bytes = load_validated_image(path).await?;
        let prompt = prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(self.default_prompt.as_str());

        let request = CompletionRequest::new(vec![ChatMessage::user_with_image(
            prompt,
            image_data_url(&bytes),
        )])
        .with_max_tokens(DESCRIPTION_MAX_TOKENS);

        self.completion.complete(request).await
    }

    /// Describe every image in order. Ids are 1-based input positions.
    ///
    /// Fails only when every image failed.
    pub async fn process_batch(&self, paths: &[PathBuf], prompt: Option<&str>) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        let total = paths.len();

        for (id, path) in (1u64..).zip(paths) {
            info!("Processing image {}/{}: {}", id, total, path.display());
            match self.process_image(path, prompt).await {
                Ok(description) => {
                    info!("Image {} described", id);
                    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.clone());
                    outcome.records.push(ImageRecord {
                        id,
                        image_path: absolute.to_string_lossy().into_owned(),
                        description,
                    });
                }
                Err(e) => {
                    error!("Image {} failed: {}", id, e);
                    outcome.failures.push(ImageFailure {
                        id,
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if outcome.records.is_empty() && !outcome.failures.is_empty() {
            let details: Vec<String> = outcome
                .failures
                .iter()
                .map(|f| format!("image {} ({}): {}", f.id, f.path.display(), f.reason))
                .collect();
            return Err(Error::BatchFailed(details.join("\n")));
        }

        if !outcome.failures.is_empty() {
            warn!(
                "Some images failed ({}/{})",
                outcome.failures.len(),
                total
            );
        }
        info!(
            "Batch complete, succeeded: {}, failed: {}",
            outcome.records.len(),
            outcome.failures.len()
        );
        Ok(outcome)
    }
}

/// Read an image and make sure it decodes before it is sent anywhere.
async fn load_validated_image(path: &Path) -> Result<Vec<u8>> {
    let bytes = tokio::fs::read(path).await?;
    let display = path.display().to_string();

    tokio::task::spawn_blocking(move || match image::load_from_memory(&bytes) {
        Ok(_) => Ok(bytes),
        Err(e) => Err(Error::InvalidImage {
            path: display,
            reason: e.to_string(),
        }),
    })
    .await
    .map_err(|e| Error::Invariant(format!("Image validation task join error: {}", e)))?
}
