//! Persist the decomposition tree next to the generated text.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::tree::TaskNode;

/// Write the tree as pretty-printed JSON with a trailing newline.
pub fn write_tree(tree_path: &Path, tree: &TaskNode) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(tree).context("serialize tree")?;
    buf.push('\n');
    fs::write(tree_path, buf).with_context(|| format!("write tree {}", tree_path.display()))
}
