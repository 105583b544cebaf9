//! Shared types, error model, and configuration for bridge-rlds.
//!
//! This crate is the foundation depended on by all other bridge-rlds crates.
//! It provides:
//! - [`BridgeRldsError`]: the unified error type, and [`SkipKind`]
//! - Record types ([`EpisodeRecord`], [`StepRecord`], [`Frame`]) and the
//!   [`DatasetManifest`]
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, EmbeddingConfig, ImagesConfig, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from,
};
pub use error::{BridgeRldsError, Result, SkipKind};
pub use types::{
    ACTION_DIM, CURRENT_SCHEMA_VERSION, DatasetId, DatasetManifest, EMBEDDING_DIM, EmbeddingMeta,
    EpisodeMetadata, EpisodeRecord, FeatureSpec, Frame, JOINT_DIM, NUM_INSTRUCTIONS, Observation,
    ShardMeta, SkippedEpisode, StepRecord, episode_features,
};
