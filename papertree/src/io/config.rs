//! Pipeline configuration loaded from TOML.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::Section;
use crate::io::retry::RetryPolicy;

pub const DEFAULT_TITLE: &str =
    "Political Mobilization in the Digital Era: The Impact of Online Activities on Traditional Politics";

/// Pipeline configuration (TOML).
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Paper title handed to the level-0 decomposition.
    pub title: String,

    /// Sections that get a compressed summary and an illustration.
    pub illustrate_sections: Vec<Section>,

    pub generator: GeneratorConfig,

    pub image: ImageConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            illustrate_sections: vec![Section::Methodology, Section::Results],
            generator: GeneratorConfig::default(),
            image: ImageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorBackend {
    /// Spawn a local chat-completion command per dialog.
    Command,
    /// POST to an OpenAI-compatible `/chat/completions` endpoint.
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    pub backend: GeneratorBackend,

    /// Argv of the command backend; `--ckpt-dir` and `--tokenizer-path` are appended.
    pub command: Vec<String>,

    pub api_base: String,
    pub model: String,

    /// Environment variable holding the bearer token for the http backend.
    pub api_key_env: String,

    /// Kill the command backend, or abort the http request, after this many
    /// seconds. Unset waits forever.
    pub timeout_secs: Option<u64>,

    /// Truncate captured command stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            backend: GeneratorBackend::Command,
            command: vec![
                "torchrun".to_string(),
                "--nproc_per_node".to_string(),
                "1".to_string(),
                "chat_completion.py".to_string(),
            ],
            api_base: "http://localhost:8000/v1".to_string(),
            model: "llama-2-7b-chat".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: None,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImageConfig {
    pub enabled: bool,
    pub api_base: String,
    pub model: String,
    pub size: String,
    pub quality: String,
    pub api_key_env: String,
    /// Per-request limit for generation and download. Unset waits forever.
    pub timeout_secs: Option<u64>,
    pub proxy: ProxyConfig,
    pub retry: RetryPolicy,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base: "https://api.openai.com/v1".to_string(),
            model: "dall-e-3".to_string(),
            size: "1024x1024".to_string(),
            quality: "standard".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: None,
            proxy: ProxyConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Proxies for the image client. Unset means direct connections.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProxyConfig {
    pub http: Option<String>,
    pub https: Option<String>,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(anyhow!("title must be non-empty"));
        }
        if self.generator.backend == GeneratorBackend::Command
            && (self.generator.command.is_empty() || self.generator.command[0].trim().is_empty())
        {
            return Err(anyhow!("generator.command must be a non-empty array"));
        }
        if self.generator.backend == GeneratorBackend::Http
            && self.generator.api_base.trim().is_empty()
        {
            return Err(anyhow!("generator.api_base must be set for the http backend"));
        }
        if self.generator.output_limit_bytes == 0 {
            return Err(anyhow!("generator.output_limit_bytes must be > 0"));
        }
        if self.generator.timeout_secs == Some(0) {
            return Err(anyhow!("generator.timeout_secs must be > 0 when set"));
        }
        if self.image.enabled && self.image.api_base.trim().is_empty() {
            return Err(anyhow!("image.api_base must be set when images are enabled"));
        }
        if self.image.timeout_secs == Some(0) {
            return Err(anyhow!("image.timeout_secs must be > 0 when set"));
        }
        self.image.retry.validate()?;
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
