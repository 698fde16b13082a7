use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bus::{LLM_TOPIC, OCR_TOPIC};
use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Worker count shared by both pipelines. Defaults to the core count.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub ocr: OcrSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    /// Where raw payload bytes are archived.
    #[serde(default = "default_filestore_path")]
    pub filestore_path: PathBuf,
    /// Database file; `None` means the per-user default location.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            ocr: OcrSettings::default(),
            llm: LlmSettings::default(),
            filestore_path: default_filestore_path(),
            database_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSettings {
    #[serde(default = "default_ocr_topic")]
    pub topic: String,
    /// Number of engine handles, fixed at startup. Defaults to the core
    /// count, matching the worker count.
    #[serde(default = "default_worker_count")]
    pub pool_size: usize,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            topic: default_ocr_topic(),
            pool_size: default_worker_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_topic")]
    pub topic: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Falls back to the `OPENAI_API_KEY` environment variable when unset.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            topic: default_llm_topic(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
            api_key: None,
        }
    }
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_ocr_topic() -> String {
    OCR_TOPIC.to_string()
}

fn default_llm_topic() -> String {
    LLM_TOPIC.to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_api_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_filestore_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".textractor").join("files"))
        .unwrap_or_else(|| PathBuf::from("filestore"))
}

/// Loads configuration from a JSON file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config = serde_json::from_str(&raw)?;
    Ok(config)
}
