//! Tracing setup for the command-line binary.
//!
//! Diagnostics go to stderr and are controlled by `RUST_LOG`. Run artifacts
//! (generated text, timing CSVs) are written by the pipeline regardless.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "papertree=info";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `papertree=info`. Output is compact on stderr.
///
/// # Example
/// ```bash
/// RUST_LOG=papertree=debug papertree --ckpt-dir ckpt --tokenizer-path tok.model
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
