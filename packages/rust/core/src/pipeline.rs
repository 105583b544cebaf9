//! End-to-end `ingest` pipeline: source root → discovery → per-episode
//! assembly → shards → manifest.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{info, instrument, warn};

use bridge_rlds_discovery::{DiscoveryLayout, discover_episodes};
use bridge_rlds_reader::{FsEpisodeReader, ReadOptions};
use bridge_rlds_shards::{ShardWriter, write_manifest};
use bridge_rlds_shared::{
    AppConfig, CURRENT_SCHEMA_VERSION, DatasetId, DatasetManifest, EmbeddingConfig, EmbeddingMeta,
    Result, SkippedEpisode, episode_features, expand_home,
};

use crate::bridge::BridgeEmbedder;
use crate::embedding::{CachedEmbedder, Embedder};
use crate::episode::{EpisodeIngestor, EpisodeOutcome};

/// Configuration for the `ingest` pipeline.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Root episodes are discovered under.
    pub source: PathBuf,
    /// How episodes are laid out under `source`.
    pub layout: DiscoveryLayout,
    /// Datasets are written to `<output_root>/<name>/<version>/`.
    pub output_root: PathBuf,
    pub name: String,
    pub version: String,
    pub split: String,
    pub max_episodes_per_shard: usize,
    /// Resize frames to `(width, height)`.
    pub image_size: Option<(u32, u32)>,
    /// Convert at most this many episodes (after sorting).
    pub limit: Option<usize>,
    /// Tool version string.
    pub tool_version: String,
    /// Embedding model recorded in the manifest.
    pub embedding_model: String,
}

impl IngestConfig {
    /// Build from the resolved application config. CLI flags are applied on
    /// top of the returned value.
    pub fn from_app(config: &AppConfig, source: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            source: source.into(),
            layout: config.defaults.layout.parse()?,
            output_root: expand_home(&config.defaults.output_dir),
            name: config.defaults.dataset_name.clone(),
            version: config.defaults.version.clone(),
            split: config.defaults.split.clone(),
            max_episodes_per_shard: config.defaults.max_episodes_per_shard,
            image_size: config.images.target_size(),
            limit: None,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            embedding_model: config.embedding.model.clone(),
        })
    }

    /// Directory the dataset is written to.
    pub fn dataset_dir(&self) -> PathBuf {
        self.output_root.join(&self.name).join(&self.version)
    }
}

/// Result of the `ingest` pipeline.
#[derive(Debug)]
pub struct IngestResult {
    /// Directory holding the shards and manifest.
    pub dataset_dir: PathBuf,
    /// The manifest as written.
    pub manifest: DatasetManifest,
    /// Episodes found by discovery (after `limit`).
    pub discovered: usize,
    /// Total elapsed time.
    pub elapsed: std::time::Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before each episode is read.
    fn episode_started(&self, path: &Path, current: usize, total: usize);
    /// Called when an episode is left out.
    fn episode_skipped(&self, skipped: &SkippedEpisode);
    /// Called when the pipeline completes.
    fn done(&self, result: &IngestResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn episode_started(&self, _path: &Path, _current: usize, _total: usize) {}
    fn episode_skipped(&self, _skipped: &SkippedEpisode) {}
    fn done(&self, _result: &IngestResult) {}
}

/// Spawn the configured embedding bridge behind an instruction cache.
pub fn spawn_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    let bridge = BridgeEmbedder::spawn(config)?;
    Ok(Box::new(CachedEmbedder::new(bridge)))
}

/// Run the full `ingest` pipeline.
///
/// 1. Discover episode directories
/// 2. Assemble each episode, skipping broken ones
/// 3. Append records to rotating shards
/// 4. Write `dataset_info.json`
///
/// Per-episode failures are recorded in the manifest's `skipped` list. Only
/// an empty discovery, config errors and output-side I/O abort the run.
#[instrument(skip_all, fields(source = %config.source.display(), name = %config.name))]
pub fn ingest(
    config: &IngestConfig,
    embedder: Option<Box<dyn Embedder>>,
    progress: &dyn ProgressReporter,
) -> Result<IngestResult> {
    let start = Instant::now();

    // --- Phase 1: Discovery ---
    progress.phase("Discovering episodes");
    let mut episodes = discover_episodes(&config.source, config.layout)?;
    if let Some(limit) = config.limit.filter(|l| *l > 0) {
        episodes.truncate(limit);
    }
    let total = episodes.len();
    info!(total, layout = config.layout.as_str(), "starting ingest");

    // --- Phase 2: Convert & write shards ---
    let dataset_dir = config.dataset_dir();
    let mut writer = ShardWriter::create(
        &dataset_dir,
        &config.name,
        &config.split,
        config.max_episodes_per_shard,
    )?;

    let reader = FsEpisodeReader::new(ReadOptions {
        image_size: config.image_size,
        ..Default::default()
    });
    let mut ingestor = EpisodeIngestor::new(reader, embedder);

    progress.phase("Converting episodes");
    let mut skipped = Vec::new();
    let mut step_count = 0;

    for (i, path) in episodes.iter().enumerate() {
        progress.episode_started(path, i + 1, total);
        match ingestor.ingest(path) {
            EpisodeOutcome::Ingested { key, record } => {
                step_count += record.steps.len();
                writer.write_episode(&key, &record)?;
            }
            EpisodeOutcome::Skipped { reason, .. } => {
                progress.episode_skipped(&reason);
                skipped.push(reason);
            }
        }
    }

    ingestor.finish()?;
    let episode_count = writer.episode_count();
    let shards = writer.finish()?;

    if episode_count == 0 {
        warn!(skipped = skipped.len(), "every episode was skipped");
    }

    // --- Phase 3: Manifest ---
    progress.phase("Writing manifest");
    let image_shape: Vec<usize> = config
        .image_size
        .map(|(w, h)| vec![h as usize, w as usize, 3])
        .unwrap_or_default();

    let embedding = ingestor
        .cache_stats()
        .map(|(cache_hits, cache_misses)| EmbeddingMeta {
            model: config.embedding_model.clone(),
            dimension: ingestor.embedding_dimension(),
            cache_hits,
            cache_misses,
        });

    let manifest = DatasetManifest {
        schema_version: CURRENT_SCHEMA_VERSION,
        id: DatasetId::new(),
        name: config.name.clone(),
        version: config.version.clone(),
        source: config.source.display().to_string(),
        tool_version: config.tool_version.clone(),
        created_at: chrono::Utc::now(),
        split: config.split.clone(),
        episode_count,
        step_count,
        shards,
        skipped,
        embedding,
        features: episode_features(&image_shape, ingestor.embedding_dimension()),
    };
    write_manifest(&dataset_dir, &manifest)?;

    let result = IngestResult {
        dataset_dir,
        manifest,
        discovered: total,
        elapsed: start.elapsed(),
    };

    progress.done(&result);

    info!(
        dataset = %result.dataset_dir.display(),
        episodes = result.manifest.episode_count,
        steps = result.manifest.step_count,
        skipped = result.manifest.skipped.len(),
        shards = result.manifest.shards.len(),
        elapsed_ms = result.elapsed.as_millis(),
        "ingest complete"
    );

    Ok(result)
}
