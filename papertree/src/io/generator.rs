//! Text-generation backends.
//!
//! The [`Generator`] trait decouples the pipeline from the model service.
//! Tests use scripted generators that answer without spawning processes or
//! opening sockets.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::types::{Dialog, GenerationParams, Message};
use crate::io::config::{GeneratorBackend, GeneratorConfig};
use crate::io::process::run_command;

/// Abstraction over text-generation services.
pub trait Generator {
    /// Complete one dialog, returning the assistant message.
    fn chat(&self, dialog: &Dialog, params: &GenerationParams) -> Result<Message>;
}

impl<G: Generator + ?Sized> Generator for Box<G> {
    fn chat(&self, dialog: &Dialog, params: &GenerationParams) -> Result<Message> {
        (**self).chat(dialog, params)
    }
}

/// Model checkpoint locations forwarded to the command backend.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub ckpt_dir: PathBuf,
    pub tokenizer_path: PathBuf,
}

/// Build the backend selected in config.
pub fn build_generator(config: &GeneratorConfig, paths: ModelPaths) -> Result<Box<dyn Generator>> {
    match config.backend {
        GeneratorBackend::Command => Ok(Box::new(CommandGenerator::new(config, paths))),
        GeneratorBackend::Http => Ok(Box::new(HttpGenerator::new(config)?)),
    }
}

/// Stdin payload for the command backend: one dialog per batch.
#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    dialogs: [&'a Dialog; 1],
    temperature: f64,
    top_p: f64,
    max_gen_len: Option<u32>,
    max_seq_len: u32,
    max_batch_size: u32,
    seed: u64,
}

#[derive(Debug, Deserialize)]
struct CompletionRecord {
    generation: Message,
}

/// Generator that spawns a local chat-completion command per dialog.
///
/// The command reads a JSON request on stdin and prints
/// `[{"generation": {"role": ..., "content": ...}}]` on stdout.
pub struct CommandGenerator {
    command: Vec<String>,
    paths: ModelPaths,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
}

impl CommandGenerator {
    pub fn new(config: &GeneratorConfig, paths: ModelPaths) -> Self {
        Self {
            command: config.command.clone(),
            paths,
            timeout: config.timeout_secs.map(Duration::from_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn build_command(&self) -> Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("generator command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("--ckpt-dir")
            .arg(&self.paths.ckpt_dir)
            .arg("--tokenizer-path")
            .arg(&self.paths.tokenizer_path);
        Ok(cmd)
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(messages = dialog.len()))]
    fn chat(&self, dialog: &Dialog, params: &GenerationParams) -> Result<Message> {
        let request = CommandRequest {
            dialogs: [dialog],
            temperature: params.temperature,
            top_p: params.top_p,
            max_gen_len: params.max_gen_len,
            max_seq_len: params.max_seq_len,
            max_batch_size: params.max_batch_size,
            seed: params.seed,
        };
        let payload = serde_json::to_vec(&request).context("serialize generator request")?;

        let output = run_command(
            self.build_command()?,
            Some(&payload),
            self.timeout,
            self.output_limit_bytes,
        )
        .context("run generator command")?;

        if output.timed_out {
            bail!("generator command timed out after {:?}", self.timeout);
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "generator command failed");
            bail!(
                "generator command failed with status {:?}: {}",
                output.status.code(),
                output.stderr_tail(512)
            );
        }
        if output.stdout_truncated > 0 {
            bail!(
                "generator output exceeded {} bytes; raise generator.output_limit_bytes",
                self.output_limit_bytes
            );
        }

        let records: Vec<CompletionRecord> =
            serde_json::from_slice(&output.stdout).context("parse generator output")?;
        let record = records
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("generator returned no completions"))?;
        debug!(chars = record.generation.content.len(), "generator completed");
        Ok(record.generation)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a Dialog,
    temperature: f64,
    top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    seed: u64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Message,
}

/// Generator backed by an OpenAI-compatible chat completions endpoint.
pub struct HttpGenerator {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl HttpGenerator {
    /// Build a client for `config.api_base`.
    ///
    /// Requests wait for `config.timeout_secs`, or forever when it is unset.
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.timeout_secs.map(Duration::from_secs))
            .build()
            .context("build generator http client")?;
        Ok(Self {
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: non_empty_env(&config.api_key_env),
            http,
        })
    }

    /// Use `api_key` instead of the configured environment variable.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

impl Generator for HttpGenerator {
    #[instrument(skip_all, fields(endpoint = %self.endpoint, messages = dialog.len()))]
    fn chat(&self, dialog: &Dialog, params: &GenerationParams) -> Result<Message> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: dialog,
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_gen_len,
            seed: params.seed,
        };
        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .with_context(|| format!("generator request failed ({})", self.endpoint))?;
        let status = response.status();
        let text = response
            .text()
            .context("generator response body read failed")?;
        if !status.is_success() {
            bail!(
                "generator request failed ({}): {}",
                status.as_u16(),
                truncate_text(&text, 512)
            );
        }
        let parsed: ChatCompletionResponse =
            serde_json::from_str(&text).context("generator returned invalid JSON payload")?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("generator returned no choices"))?;
        Ok(choice.message)
    }
}

pub(crate) fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
