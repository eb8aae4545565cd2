//! Shared types, error model, and configuration for PageStream.
//!
//! This crate is the foundation depended on by all other PageStream crates.
//! It provides:
//! - [`PageStreamError`]: the unified error type
//! - [`SourceId`]: classification of a configured source identifier
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, OutputConfig, SourceConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from,
};
pub use error::{PageStreamError, Result};
pub use types::{SCHEME_SEPARATOR, SourceId};
