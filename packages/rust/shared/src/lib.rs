//! Shared types, error model, and configuration for sitesort.
//!
//! This crate is the foundation depended on by all other sitesort crates.
//! It provides:
//! - [`SitesortError`], the unified error type
//! - Domain types ([`Domain`], [`ClassificationResult`], [`BatchRecord`], [`BatchId`])
//! - Configuration ([`AppConfig`], [`ProcessingConfig`], [`PipelineSettings`], provider resolution)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ClassifierConfig, DefaultsConfig, OcrConfig, PipelineConfig, PipelineSettings,
    ProviderConfig, ProviderKind, StorageConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, resolve_provider,
};
pub use error::{Result, SitesortError};
pub use types::{
    BatchId, BatchRecord, BatchStatus, ClassificationLabel, ClassificationResult, Domain,
    ExtractionMethod, ProcessingConfig,
};
