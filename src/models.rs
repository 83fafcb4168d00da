//! Data models and structures
//!
//! Defines the dataset records produced by the pipelines and the runtime
//! configuration for the completion endpoint.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// One instruction-tuning record produced from a text chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRecord {
    pub instruction: String,
    #[serde(default)]
    pub input: String,
    pub output: String,
}

impl TextRecord {
    pub fn new(instruction: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            input: String::new(),
            output: output.into(),
        }
    }
}

/// One image/description pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: u64,
    pub image_path: String,
    pub description: String,
}

impl ImageRecord {
    /// Records with a blank path or description are never persisted.
    pub fn is_complete(&self) -> bool {
        !self.image_path.trim().is_empty() && !self.description.trim().is_empty()
    }
}

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_RETRIES: u32 = 3;

// Configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            output_dir: PathBuf::from("output"),
        }
    }
}

impl Config {
    pub fn from_env() -> crate::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let timeout_secs = match non_empty("AI_TIMEOUT_SECS") {
            Some(raw) => parse_number::<u64>("AI_TIMEOUT_SECS", &raw)?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        let max_retries = match non_empty("AI_MAX_RETRIES") {
            Some(raw) => parse_number::<u32>("AI_MAX_RETRIES", &raw)?,
            None => DEFAULT_MAX_RETRIES,
        };

        Ok(Self {
            api_key: non_empty("AI_API_KEY"),
            base_url: non_empty("AI_BASE_URL")
                .map(|url| normalize_base_url(&url))
                .unwrap_or(defaults.base_url),
            model: non_empty("AI_MODEL").unwrap_or(defaults.model),
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
            output_dir: non_empty("DATAMAKER_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = normalize_base_url(base_url);
        self
    }

    /// Returns the API key, or a configuration error when none was supplied.
    pub fn require_api_key(&self) -> crate::Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| crate::Error::Config("AI_API_KEY not set".to_string()))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> crate::Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| crate::Error::Config(format!("{} must be a non-negative integer, got '{}'", key, raw)))
}

fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_BASE_URL.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_text_record_input_defaults_to_empty() {
        let record: TextRecord =
            serde_json::from_str(r#"{"instruction": "Tides", "output": "The moon pulls."}"#)
                .unwrap();
        assert_eq!(record, TextRecord::new("Tides", "The moon pulls."));
    }

    #[test]
    fn test_image_record_completeness() {
        let mut record = ImageRecord {
            id: 1,
            image_path: "/tmp/cat.png".to_string(),
            description: "A cat".to_string(),
        };
        assert!(record.is_complete());

        record.description = "   ".to_string();
        assert!(!record.is_complete());
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.max_retries, 3);
        assert!(config.api_key.is_none());
        assert!(config.require_api_key().is_err());
    }

    #[test]
    fn test_config_reads_overrides_and_strips_trailing_slash() {
        let config = Config::from_lookup(lookup_from(&[
            ("AI_API_KEY", "sk-test"),
            ("AI_BASE_URL", "https://proxy.example.com/"),
            ("AI_MODEL", "vision-large"),
            ("AI_TIMEOUT_SECS", "15"),
            ("AI_MAX_RETRIES", "5"),
            ("DATAMAKER_OUTPUT_DIR", "/data/out"),
        ]))
        .unwrap();

        assert_eq!(config.require_api_key().unwrap(), "sk-test");
        assert_eq!(config.base_url, "https://proxy.example.com");
        assert_eq!(config.model, "vision-large");
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.output_dir, PathBuf::from("/data/out"));
    }

    #[test]
    fn test_config_rejects_invalid_number() {
        let err = Config::from_lookup(lookup_from(&[("AI_MAX_RETRIES", "many")])).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_blank_base_url_falls_back_to_default() {
        let config = Config::default().with_base_url("  ");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }
}
