//! Hierarchical paper writer.
//!
//! A paper request is decomposed by a language model into sections and then
//! into sub-subtasks, prose is generated for every leaf, and files are merged
//! bottom-up into one document. Selected sections are summarized and
//! illustrated by an image-generation service.
//!
//! - **[`core`]**: Pure logic (types, brace extraction, word budgets).
//! - **[`io`]**: Model and image backends, prompts, config, file merging, timing.
//! - **[`pipeline`]**: The orchestrator tying both together.

pub mod core;
pub mod io;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tree;
