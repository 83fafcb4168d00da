use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use datamaker::app::App;
use datamaker::models::Config;
use datamaker::pipeline::TextPrompts;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "datamaker")]
#[command(about = "Turn text documents and images into training datasets")]
struct CliArgs {
    /// API key (overrides AI_API_KEY).
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Endpoint root (overrides AI_BASE_URL).
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Model identifier (overrides AI_MODEL).
    #[arg(long, global = true)]
    model: Option<String>,

    /// Output directory (overrides DATAMAKER_OUTPUT_DIR).
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that the API key, endpoint and model work.
    Probe,

    /// Segment text files into instruction records.
    Text {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        #[arg(long, default_value = "text_dataset.json")]
        output: String,

        /// Replace the text-analysis system prompt with this file's contents.
        #[arg(long, value_name = "FILE")]
        analysis_prompt: Option<PathBuf>,

        #[arg(long, value_name = "FILE")]
        title_prompt: Option<PathBuf>,

        #[arg(long, value_name = "FILE")]
        format_prompt: Option<PathBuf>,
    },

    /// Describe images and merge them into the image dataset.
    Images {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Description prompt; the built-in prompt is used when omitted.
        #[arg(long)]
        prompt: Option<String>,

        #[arg(long, default_value = "image_dataset.json")]
        output: String,

        /// Describe the files in place instead of copying them under the output directory.
        #[arg(long)]
        no_stage: bool,
    },
}

impl CliArgs {
    fn apply_overrides(&self, mut config: Config) -> Config {
        if let Some(api_key) = &self.api_key {
            config.api_key = Some(api_key.clone());
        }
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url);
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir = output_dir.clone();
        }
        config
    }
}

fn read_prompt(path: Option<&Path>, default: &str) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt file {}", path.display())),
        None => Ok(default.to_string()),
    }
}

/// Process every file, keeping the records of files that succeeded.
///
/// A failed file is logged and skipped. Whatever was produced is saved, and
/// the command still fails when any file did.
async fn run_text(app: &mut App, files: &[PathBuf], output: &str) -> Result<()> {
    let mut failed = Vec::new();
    for file in files {
        if let Err(e) = app.process_text_file(file).await {
            error!("Failed to process {}: {:#}", file.display(), anyhow::Error::from(e));
            failed.push(file.display().to_string());
        }
    }

    if !app.session().text_records().is_empty() {
        let summary = app.save_text_dataset(output)?;
        println!(
            "Saved {} text records to {}",
            summary.written,
            summary.path.display()
        );
    }

    if !failed.is_empty() {
        bail!("{} of {} files failed: {}", failed.len(), files.len(), failed.join(", "));
    }
    Ok(())
}

async fn run(args: CliArgs) -> Result<()> {
    let config = args.apply_overrides(Config::from_env()?);
    let mut app = App::new(&config)?;

    match args.command {
        Command::Probe => {
            app.test_connection().await?;
            println!("API connection OK ({})", config.model);
        }
        Command::Text {
            files,
            output,
            analysis_prompt,
            title_prompt,
            format_prompt,
        } => {
            let defaults = TextPrompts::default();
            app.set_text_prompts(TextPrompts {
                analysis: read_prompt(analysis_prompt.as_deref(), &defaults.analysis)?,
                title: read_prompt(title_prompt.as_deref(), &defaults.title)?,
                format: read_prompt(format_prompt.as_deref(), &defaults.format)?,
            });

            run_text(&mut app, &files, &output).await?;
        }
        Command::Images {
            files,
            prompt,
            output,
            no_stage,
        } => {
            let outcome = app
                .process_images(&files, prompt.as_deref(), !no_stage)
                .await?;
            for failure in &outcome.failures {
                warn!(
                    "Skipped image {} ({}): {}",
                    failure.id,
                    failure.path.display(),
                    failure.reason
                );
            }
            let summary = app.save_image_dataset(&output)?;
            println!(
                "Saved {} image records to {} ({} total)",
                summary.written,
                summary.path.display(),
                summary.total
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "datamaker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();
    info!("Starting datamaker");

    match run(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("datamaker failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
