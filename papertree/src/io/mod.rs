//! I/O helpers: model and image services, files, configuration.

pub mod config;
pub mod generator;
pub mod image;
pub mod merge;
pub mod process;
pub mod prompt;
pub mod retry;
pub mod timing;
pub mod tree_store;
