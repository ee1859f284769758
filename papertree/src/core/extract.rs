//! Brace extraction for structured model output.
//!
//! Models are instructed to wrap every structured unit in `{ }`. Matching is
//! non-greedy and line-bound: a fragment ends at the first `}` after its `{`,
//! so nested braces are not supported.

use std::sync::LazyLock;

use anyhow::{Result, anyhow, bail};
use regex::Regex;

static BRACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(.*?)\}").expect("brace pattern should be valid"));

const PREVIEW_CHARS: usize = 200;

/// Return every braced fragment in left-to-right order.
pub fn extract_bracket_contents(text: &str) -> Vec<String> {
    BRACE_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Extract fragments and require exactly `expected` of them.
///
/// `what` names the unit in the error message (e.g. "subtasks").
pub fn extract_exact(text: &str, expected: usize, what: &str) -> Result<Vec<String>> {
    let fragments = extract_bracket_contents(text);
    if fragments.len() != expected {
        bail!(
            "expected {} braced {}, model produced {}: {}",
            expected,
            what,
            fragments.len(),
            preview(text)
        );
    }
    Ok(fragments)
}

/// Extract the first braced fragment as a summary, dropping a `Summary:` label.
pub fn extract_summary(text: &str) -> Result<String> {
    let first = extract_bracket_contents(text)
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no braced summary in model output: {}", preview(text)))?;
    Ok(strip_summary_label(&first).to_string())
}

fn strip_summary_label(fragment: &str) -> &str {
    match fragment.strip_prefix("Summary:") {
        Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
        None => fragment,
    }
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}
