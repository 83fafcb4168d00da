//! Application orchestration: connectivity checks, processing inputs and
//! saving datasets.

use crate::ai::{CompletionService, OpenAiCompletionClient};
use crate::dataset::{DatasetSession, SaveSummary};
use crate::models::Config;
use crate::pipeline::{BatchOutcome, ImageDescriber, TextProcessor, TextPrompts};
use crate::staging::{stage_images, staging_dir};
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Owns the pipelines and the dataset buffers for one run.
pub struct App {
    completion: Arc<dyn CompletionService>,
    text: TextProcessor,
    images: ImageDescriber,
    session: DatasetSession,
    output_dir: PathBuf,
}

/// Injectable service bundle used to construct [`App`] in tests/harnesses.
pub struct AppServices {
    pub completion: Arc<dyn CompletionService>,
    pub text_prompts: TextPrompts,
}

impl AppServices {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self {
            completion,
            text_prompts: TextPrompts::default(),
        }
    }
}

impl App {
    /// Build an app from concrete service dependencies.
    pub fn with_services(services: AppServices, output_dir: PathBuf) -> Self {
        let text = TextProcessor::new(Arc::clone(&services.completion))
            .with_prompts(services.text_prompts);
        let images = ImageDescriber::new(Arc::clone(&services.completion));

        Self {
            completion: services.completion,
            text,
            images,
            session: DatasetSession::new(),
            output_dir,
        }
    }

    /// Construct an app talking to the endpoint described by `config`.
    pub fn new(config: &Config) -> Result<Self> {
        let client = OpenAiCompletionClient::from_config(config, reqwest::Client::new())?;
        info!(
            "Completion endpoint: {} (model: {})",
            config.base_url,
            client.model()
        );

        fs::create_dir_all(&config.output_dir)?;
        info!("Output directory: {}", config.output_dir.display());

        Ok(Self::with_services(
            AppServices::new(Arc::new(client)),
            config.output_dir.clone(),
        ))
    }

    pub fn session(&self) -> &DatasetSession {
        &self.session
    }

    pub fn set_text_prompts(&mut self, prompts: TextPrompts) {
        self.text.set_prompts(prompts);
    }

    pub async fn test_connection(&self) -> Result<()> {
        match self.completion.probe().await {
            Ok(()) => {
                info!("API connection OK");
                Ok(())
            }
            Err(e) => {
                error!("API connection failed: {}", e);
                Err(e)
            }
        }
    }

    /// Segment one UTF-8 text file and buffer its records.
    ///
    /// Returns the number of records the file produced.
    pub async fn process_text_file(&mut self, path: &Path) -> Result<usize> {
        info!("Processing text file: {}", path.display());
        let bytes = tokio::fs::read(path).await?;
        let text = String::from_utf8(bytes).map_err(|_| Error::InvalidInput {
            path: path.display().to_string(),
            reason: "file is not valid UTF-8".to_string(),
        })?;
        if text.trim().is_empty() {
            return Err(Error::InvalidInput {
                path: path.display().to_string(),
                reason: "file is empty".to_string(),
            });
        }

        let records = self.text.process_text(&text).await?;
        let produced = records.len();
        let buffered = self.session.push_text(records);
        info!(
            "{} produced {} records ({} buffered)",
            path.display(),
            produced,
            buffered
        );
        Ok(produced)
    }

    /// Describe a batch of images and buffer the successful records.
    ///
    /// With `stage` set, inputs are first copied under the output directory
    /// and the records point at the copies.
    pub async fn process_images(
        &mut self,
        paths: &[PathBuf],
        prompt: Option<&str>,
        stage: bool,
    ) -> Result<BatchOutcome> {
        let inputs: Vec<PathBuf> = if stage {
            stage_images(paths.to_vec(), staging_dir(&self.output_dir)).await?
        } else {
            paths.to_vec()
        };

        let outcome = self.images.process_batch(&inputs, prompt).await?;
        let buffered = self.session.push_images(outcome.records.clone());
        info!("{} image records buffered", buffered);
        Ok(outcome)
    }

    /// Write buffered text records to `file_name` under the output directory.
    pub fn save_text_dataset(&mut self, file_name: &str) -> Result<SaveSummary> {
        let path = self.output_dir.join(file_name);
        self.session.save_text(&path)
    }

    /// Merge buffered image records into `file_name` under the output directory.
    pub fn save_image_dataset(&mut self, file_name: &str) -> Result<SaveSummary> {
        let path = self.output_dir.join(file_name);
        self.session.save_images(&path)
    }
}
