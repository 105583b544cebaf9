//! Core conversion logic for bridge-rlds.
//!
//! This crate ties together discovery, artifact reading, per-episode
//! assembly, language embedding and shard writing into the end-to-end
//! [`pipeline::ingest`] workflow.

pub mod bridge;
pub mod embedding;
pub mod episode;
pub mod pipeline;
pub mod rotation;

pub use bridge::BridgeEmbedder;
pub use embedding::{CachedEmbedder, Embedder};
pub use episode::{EpisodeIngestor, EpisodeOutcome};
pub use pipeline::{
    IngestConfig, IngestResult, ProgressReporter, SilentProgress, ingest, spawn_embedder,
};
