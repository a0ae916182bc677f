use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default)]
    pub genai: GenaiConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenaiConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_text_model")]
    pub text_model: String,

    #[serde(default = "default_image_model")]
    pub image_model: String,

    #[serde(default = "default_timeout")]
    pub request_timeout_seconds: u64,

    #[serde(default = "default_concurrency")]
    pub max_concurrent_requests: usize,
}

fn default_output() -> String {
    "output".to_string()
}
fn default_text_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_image_model() -> String {
    "gemini-2.5-flash-image".to_string()
}
fn default_timeout() -> u64 {
    30
}
fn default_concurrency() -> usize {
    4
}

impl Default for GenaiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            text_model: default_text_model(),
            image_model: default_image_model(),
            request_timeout_seconds: default_timeout(),
            max_concurrent_requests: default_concurrency(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_folder: default_output(),
            genai: GenaiConfig::default(),
        }
    }
}

impl Config {
    /// Loads config.yml when present, otherwise starts from defaults.
    /// GOOGLE_API_KEY in the environment always wins over the file.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(Path::new("config.yml"))?;

        if let Ok(key) = std::env::var("GOOGLE_API_KEY") {
            if !key.is_empty() {
                config.genai.api_key = key;
            }
        }

        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}
