//! Section illustrations via an external image-generation service.
//!
//! The [`Illustrator`] trait separates the pipeline from the HTTP service.
//! [`ImageClient`] is the real implementation: one generation request per
//! prompt (never retried) and a download that retries transient statuses
//! according to an explicit [`RetryPolicy`].

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Proxy;
use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::io::config::{ImageConfig, ProxyConfig};
use crate::io::generator::{non_empty_env, truncate_text};
use crate::io::retry::RetryPolicy;
use crate::io::timing::TimingLog;

pub const ILLUSTRATION_INSTRUCTION: &str =
    "Generate a paper illustration based on the following content:\n";

/// Character budget of an illustration prompt, instruction included.
pub const PROMPT_CHAR_LIMIT: usize = 1000;

pub const IMAGE_TIMING_FILE: &str = "image_time.csv";

/// Abstraction over image-generation services.
pub trait Illustrator {
    /// Request one image and return its URL.
    fn generate(&self, prompt: &str) -> Result<String>;

    /// Fetch `url` into `path`.
    fn download(&self, url: &str, path: &Path) -> Result<()>;
}

/// Wrap `text` in the illustration instruction and cut it to [`PROMPT_CHAR_LIMIT`] characters.
pub fn illustration_prompt(text: &str) -> String {
    let full = format!("{ILLUSTRATION_INSTRUCTION}\"\"\"\n{text}\n\"\"\"");
    full.chars().take(PROMPT_CHAR_LIMIT).collect()
}

/// Illustrate `dir/{name}.txt` into `dir/{name}.png`.
///
/// Generation latency is appended to `image_time.csv` as `image{num}` before
/// the download starts.
#[instrument(skip_all, fields(dir = %dir.display(), name, num))]
pub fn generate_picture<I: Illustrator + ?Sized>(
    dir: &Path,
    name: &str,
    num: usize,
    illustrator: &I,
) -> Result<PathBuf> {
    let source = dir.join(format!("{name}.txt"));
    let text = fs::read_to_string(&source).with_context(|| format!("read {}", source.display()))?;
    let prompt = illustration_prompt(&text);
    debug!(chars = prompt.chars().count(), prompt = %prompt, "illustration prompt");

    let timing = TimingLog::new(dir.join(IMAGE_TIMING_FILE));
    let url = timing.time(&format!("image{num}"), || illustrator.generate(&prompt))?;
    info!(url = %url, "illustration generated");

    let image_path = dir.join(format!("{name}.png"));
    illustrator.download(&url, &image_path)?;
    Ok(image_path)
}

#[derive(Debug, Serialize)]
struct ImageGenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    quality: &'a str,
    n: u32,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    url: Option<String>,
}

/// OpenAI-style image client with explicit proxy and retry configuration.
pub struct ImageClient {
    endpoint: String,
    model: String,
    size: String,
    quality: String,
    api_key: Option<String>,
    retry: RetryPolicy,
    http: HttpClient,
}

impl ImageClient {
    pub fn from_config(config: &ImageConfig) -> Result<Self> {
        let base = config.api_base.trim_end_matches('/');
        let timeout = config.timeout_secs.map(Duration::from_secs);
        Ok(Self {
            endpoint: format!("{base}/images/generations"),
            model: config.model.clone(),
            size: config.size.clone(),
            quality: config.quality.clone(),
            api_key: non_empty_env(&config.api_key_env),
            retry: config.retry.clone(),
            http: build_http_client(&config.proxy, timeout)?,
        })
    }

    /// Use `api_key` instead of the configured environment variable.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

impl Illustrator for ImageClient {
    #[instrument(skip_all, fields(endpoint = %self.endpoint, model = %self.model))]
    fn generate(&self, prompt: &str) -> Result<String> {
        let Some(api_key) = &self.api_key else {
            bail!("image api key not set");
        };
        let body = ImageGenerationRequest {
            model: &self.model,
            prompt,
            size: &self.size,
            quality: &self.quality,
            n: 1,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .with_context(|| format!("image request failed ({})", self.endpoint))?;
        let status = response.status();
        let text = response.text().context("image response body read failed")?;
        if !status.is_success() {
            bail!(
                "image request failed ({}): {}",
                status.as_u16(),
                truncate_text(&text, 512)
            );
        }
        let parsed: ImageGenerationResponse =
            serde_json::from_str(&text).context("image service returned invalid JSON")?;
        parsed
            .data
            .into_iter()
            .find_map(|datum| datum.url)
            .ok_or_else(|| anyhow!("image response missing url"))
    }

    fn download(&self, url: &str, path: &Path) -> Result<()> {
        download_file(&self.http, url, path, &self.retry)
    }
}

/// Build a client that only uses the proxies named in `proxy`.
///
/// `timeout` bounds each request; `None` waits forever.
pub fn build_http_client(proxy: &ProxyConfig, timeout: Option<Duration>) -> Result<HttpClient> {
    let mut builder = HttpClient::builder().no_proxy().timeout(timeout);
    if let Some(url) = &proxy.http {
        let http = Proxy::http(url).with_context(|| format!("invalid http proxy {url}"))?;
        builder = builder.proxy(http);
    }
    if let Some(url) = &proxy.https {
        let https = Proxy::https(url).with_context(|| format!("invalid https proxy {url}"))?;
        builder = builder.proxy(https);
    }
    builder.build().context("build image http client")
}

/// Stream `url` into `path`, retrying statuses listed in `policy`.
///
/// Other failure statuses and transport errors are returned immediately.
#[instrument(skip_all, fields(url, path = %path.display(), max_retries = policy.max_retries))]
pub fn download_file(
    http: &HttpClient,
    url: &str,
    path: &Path,
    policy: &RetryPolicy,
) -> Result<()> {
    let mut retries = 0u32;
    loop {
        let request = http.get(url);
        let mut response =
            request.send().with_context(|| format!("image download failed ({url})"))?;
        let status = response.status();
        if status.is_success() {
            let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            let bytes = response
                .copy_to(&mut writer)
                .with_context(|| format!("write {}", path.display()))?;
            writer
                .flush()
                .with_context(|| format!("flush {}", path.display()))?;
            debug!(bytes, retries, "image downloaded");
            return Ok(());
        }

        let code = status.as_u16();
        if !policy.is_retryable(code) {
            let body = response.text().unwrap_or_default();
            bail!(
                "image download failed ({code}): {}",
                truncate_text(&body, 512)
            );
        }
        if retries >= policy.max_retries {
            bail!("image download gave up after {retries} retries (last status {code})");
        }
        retries += 1;
        let delay = policy.backoff(retries);
        warn!(
            status = code,
            retry = retries,
            delay_ms = delay.as_millis() as u64,
            "transient download status, retrying"
        );
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}
