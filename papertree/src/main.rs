//! Hierarchical paper writer.
//!
//! Decomposes a paper request with a language model, writes every leaf, and
//! merges the results into `{results_root}/results_word_{W}_seed_{seed}/result.txt`.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use papertree::core::types::GenerationParams;
use papertree::io::config::{GeneratorBackend, PipelineConfig, load_config};
use papertree::io::generator::{ModelPaths, build_generator};
use papertree::io::image::{ImageClient, Illustrator};
use papertree::logging;
use papertree::pipeline::{Pipeline, RunRequest};

#[derive(Parser, Debug)]
#[command(
    name = "papertree",
    version,
    about = "Write a paper by recursive task decomposition"
)]
struct Cli {
    /// Model checkpoint directory (command backend).
    #[arg(long)]
    ckpt_dir: Option<PathBuf>,
    /// Tokenizer model path (command backend).
    #[arg(long)]
    tokenizer_path: Option<PathBuf>,
    #[arg(long, default_value_t = 0.6)]
    temperature: f64,
    #[arg(long, default_value_t = 0.9)]
    top_p: f64,
    #[arg(long, default_value_t = 512)]
    max_seq_len: u32,
    #[arg(long, default_value_t = 8)]
    max_batch_size: u32,
    /// Generation length cap; the backend decides when unset.
    #[arg(long)]
    max_gen_len: Option<u32>,
    /// Target length of the whole paper.
    #[arg(long, default_value_t = 5000)]
    word_count: u32,
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Overrides the title from config.
    #[arg(long)]
    title: Option<String>,
    #[arg(long, default_value = "./results")]
    results_root: PathBuf,
    /// TOML config; defaults apply when omitted or missing.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write summaries but request no illustrations.
    #[arg(long)]
    skip_images: bool,
}

impl Cli {
    fn params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_seq_len: self.max_seq_len,
            max_batch_size: self.max_batch_size,
            max_gen_len: self.max_gen_len,
            seed: self.seed,
        }
    }

    fn model_paths(&self, config: &PipelineConfig) -> Result<ModelPaths> {
        match (&self.ckpt_dir, &self.tokenizer_path) {
            (Some(ckpt_dir), Some(tokenizer_path)) => Ok(ModelPaths {
                ckpt_dir: ckpt_dir.clone(),
                tokenizer_path: tokenizer_path.clone(),
            }),
            _ if config.generator.backend == GeneratorBackend::Command => {
                bail!("--ckpt-dir and --tokenizer-path are required for the command backend")
            }
            _ => Ok(ModelPaths {
                ckpt_dir: PathBuf::new(),
                tokenizer_path: PathBuf::new(),
            }),
        }
    }
}

fn main() {
    logging::init();
    if let Err(err) = run(Cli::parse()) {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(title) = &cli.title {
        config.title = title.clone();
        config.validate()?;
    }

    let params = cli.params();
    let generator = build_generator(&config.generator, cli.model_paths(&config)?)?;
    let image_client = if config.image.enabled && !cli.skip_images {
        Some(ImageClient::from_config(&config.image).context("configure image client")?)
    } else {
        None
    };
    let illustrator = image_client.as_ref().map(|client| client as &dyn Illustrator);

    let request = RunRequest {
        results_root: &cli.results_root,
        word_count: cli.word_count,
        params: &params,
        config: &config,
    };
    let pipeline = Pipeline::new(&request, &*generator, illustrator)?;
    info!(
        title = %config.title,
        word_count = cli.word_count,
        seed = cli.seed,
        run_dir = %pipeline.run_dir().display(),
        images = illustrator.is_some(),
        "starting run"
    );
    let outcome = pipeline.run()?;

    println!("{}", outcome.document.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_run() {
        let cli = Cli::parse_from([
            "papertree",
            "--ckpt-dir",
            "ckpt",
            "--tokenizer-path",
            "tok",
        ]);
        assert_eq!(cli.word_count, 5000);
        assert_eq!(cli.seed, 1);
        assert_eq!(cli.results_root, PathBuf::from("./results"));
        assert!(!cli.skip_images);
        let params = cli.params();
        assert_eq!(params, GenerationParams::default());
    }

    #[test]
    fn parses_overrides() {
        let cli = Cli::parse_from([
            "papertree",
            "--word-count",
            "6000",
            "--seed",
            "7",
            "--max-gen-len",
            "256",
            "--title",
            "Tides",
            "--skip-images",
        ]);
        assert_eq!(cli.word_count, 6000);
        assert_eq!(cli.params().seed, 7);
        assert_eq!(cli.params().max_gen_len, Some(256));
        assert_eq!(cli.title.as_deref(), Some("Tides"));
        assert!(cli.skip_images);
    }

    #[test]
    fn command_backend_requires_model_paths() {
        let cli = Cli::parse_from(["papertree"]);
        let err = cli.model_paths(&PipelineConfig::default()).unwrap_err();
        assert!(err.to_string().contains("--ckpt-dir"));

        let mut config = PipelineConfig::default();
        config.generator.backend = GeneratorBackend::Http;
        assert!(cli.model_paths(&config).is_ok());
    }
}
