//! Sharded dataset writer.
//!
//! A dataset version directory looks like:
//!
//! ```text
//! <out>/<name>/<version>/
//! ├── dataset_info.json
//! ├── bridge-train.jsonl-00000-of-00002
//! └── bridge-train.jsonl-00001-of-00002
//! ```
//!
//! Each shard line is one `{"key": ..., "record": ...}` entry. Shards are
//! written under temporary names and only renamed once the total count is
//! known, so a crashed run never leaves a half-named dataset behind.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use bridge_rlds_shared::{
    BridgeRldsError, CURRENT_SCHEMA_VERSION, DatasetManifest, EpisodeRecord, Result, ShardMeta,
};

/// Manifest file name inside a dataset version directory.
pub const MANIFEST_FILE: &str = "dataset_info.json";

const TEMP_MARKER: &str = ".tmp-";

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// One line of a shard file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardEntry {
    pub key: String,
    pub record: EpisodeRecord,
}

#[derive(Serialize)]
struct ShardEntryRef<'a> {
    key: &'a str,
    record: &'a EpisodeRecord,
}

/// Final file name of shard `index` out of `total`.
pub fn shard_filename(prefix: &str, index: usize, total: usize) -> String {
    format!("{prefix}.jsonl-{index:05}-of-{total:05}")
}

// ---------------------------------------------------------------------------
// HashingWriter
// ---------------------------------------------------------------------------

/// Passes bytes through while computing their SHA-256 and length.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Hex digest and byte count of everything written so far.
    pub fn finalize(self) -> (W, String, u64) {
        (self.inner, format!("{:x}", self.hasher.finalize()), self.bytes)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.bytes += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

// ---------------------------------------------------------------------------
// ShardWriter
// ---------------------------------------------------------------------------

struct OpenShard {
    temp_path: PathBuf,
    writer: HashingWriter<BufWriter<File>>,
    episodes: usize,
}

struct ClosedShard {
    temp_path: PathBuf,
    sha256: String,
    size_bytes: u64,
    episodes: usize,
}

/// Appends episodes to rotating shard files.
pub struct ShardWriter {
    dir: PathBuf,
    prefix: String,
    max_episodes_per_shard: usize,
    current: Option<OpenShard>,
    closed: Vec<ClosedShard>,
}

impl ShardWriter {
    /// Create a writer for shards named `<name>-<split>.jsonl-*` in `dir`.
    ///
    /// Leftover temporary shards from an interrupted run are removed.
    pub fn create(
        dir: &Path,
        name: &str,
        split: &str,
        max_episodes_per_shard: usize,
    ) -> Result<Self> {
        if max_episodes_per_shard == 0 {
            return Err(BridgeRldsError::config(
                "max_episodes_per_shard must be at least 1",
            ));
        }
        std::fs::create_dir_all(dir).map_err(|e| BridgeRldsError::io(dir, e))?;

        let writer = Self {
            dir: dir.to_path_buf(),
            prefix: format!("{name}-{split}"),
            max_episodes_per_shard,
            current: None,
            closed: Vec::new(),
        };
        for stale in writer.matching_files(|n| writer.is_temp_name(n))? {
            debug!(file = %stale.display(), "removing leftover temp shard");
            std::fs::remove_file(&stale).map_err(|e| BridgeRldsError::io(&stale, e))?;
        }
        Ok(writer)
    }

    /// Episodes written so far.
    pub fn episode_count(&self) -> usize {
        self.closed.iter().map(|s| s.episodes).sum::<usize>()
            + self.current.as_ref().map_or(0, |s| s.episodes)
    }

    /// Append one episode, opening a new shard when the current one is full.
    pub fn write_episode(&mut self, key: &str, record: &EpisodeRecord) -> Result<()> {
        if self
            .current
            .as_ref()
            .is_some_and(|s| s.episodes >= self.max_episodes_per_shard)
        {
            self.close_current()?;
        }
        let shard = match self.current.take() {
            Some(shard) => shard,
            None => self.open_shard()?,
        };
        let shard = self.current.insert(shard);

        let line = serde_json::to_string(&ShardEntryRef { key, record }).map_err(|e| {
            BridgeRldsError::validation(format!("failed to serialize episode {key}: {e}"))
        })?;
        writeln!(shard.writer, "{line}").map_err(|e| BridgeRldsError::io(&shard.temp_path, e))?;
        shard.episodes += 1;
        Ok(())
    }

    /// Close the last shard, give every shard its final name and drop shards
    /// left by earlier runs.
    #[instrument(skip_all, fields(dir = %self.dir.display()))]
    pub fn finish(mut self) -> Result<Vec<ShardMeta>> {
        self.close_current()?;

        let total = self.closed.len();
        let mut metas = Vec::with_capacity(total);
        for (index, shard) in self.closed.iter().enumerate() {
            let filename = shard_filename(&self.prefix, index, total);
            let target = self.dir.join(&filename);
            std::fs::rename(&shard.temp_path, &target)
                .map_err(|e| BridgeRldsError::io(&target, e))?;
            metas.push(ShardMeta {
                filename,
                sha256: shard.sha256.clone(),
                size_bytes: shard.size_bytes,
                episodes: shard.episodes,
            });
        }

        let prefix = format!("{}.jsonl-", self.prefix);
        for stale in self.matching_files(|n| n.starts_with(&prefix))? {
            let name = stale.file_name().map(|n| n.to_string_lossy().into_owned());
            if !metas.iter().any(|m| Some(&m.filename) == name.as_ref()) {
                warn!(file = %stale.display(), "removing stale shard from an earlier run");
                std::fs::remove_file(&stale).map_err(|e| BridgeRldsError::io(&stale, e))?;
            }
        }

        info!(shards = metas.len(), "shards finalized");
        Ok(metas)
    }

    fn open_shard(&self) -> Result<OpenShard> {
        let temp_path = self
            .dir
            .join(format!(".{}{TEMP_MARKER}{}", self.prefix, self.closed.len()));
        let file = File::create(&temp_path).map_err(|e| BridgeRldsError::io(&temp_path, e))?;
        debug!(file = %temp_path.display(), "opened shard");
        Ok(OpenShard {
            temp_path,
            writer: HashingWriter::new(BufWriter::new(file)),
            episodes: 0,
        })
    }

    fn close_current(&mut self) -> Result<()> {
        let Some(mut shard) = self.current.take() else {
            return Ok(());
        };
        shard
            .writer
            .flush()
            .map_err(|e| BridgeRldsError::io(&shard.temp_path, e))?;
        let (_, sha256, size_bytes) = shard.writer.finalize();
        debug!(episodes = shard.episodes, size_bytes, "closed shard");
        self.closed.push(ClosedShard {
            temp_path: shard.temp_path,
            sha256,
            size_bytes,
            episodes: shard.episodes,
        });
        Ok(())
    }

    /// Whether `name` is one of this writer's temp shards: `.{prefix}.tmp-{n}`.
    /// Another split whose name extends this one never matches.
    fn is_temp_name(&self, name: &str) -> bool {
        name.strip_prefix('.')
            .and_then(|n| n.strip_prefix(self.prefix.as_str()))
            .and_then(|n| n.strip_prefix(TEMP_MARKER))
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    }

    /// Files in the output directory whose full names satisfy `keep`.
    fn matching_files(&self, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
        let read = std::fs::read_dir(&self.dir).map_err(|e| BridgeRldsError::io(&self.dir, e))?;
        let mut paths = Vec::new();
        for entry in read {
            let path = entry.map_err(|e| BridgeRldsError::io(&self.dir, e))?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if keep(name) && path.is_file() {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Write `dataset_info.json` atomically (temp file, then rename).
pub fn write_manifest(dir: &Path, manifest: &DatasetManifest) -> Result<PathBuf> {
    let json = serde_json::to_string_pretty(manifest).map_err(|e| {
        BridgeRldsError::validation(format!("JSON serialization failed: {e}"))
    })?;
    let target = dir.join(MANIFEST_FILE);
    let temp = dir.join(format!(".{MANIFEST_FILE}.tmp"));
    std::fs::write(&temp, json).map_err(|e| BridgeRldsError::io(&temp, e))?;
    std::fs::rename(&temp, &target).map_err(|e| BridgeRldsError::io(&target, e))?;
    debug!(path = %target.display(), "wrote manifest");
    Ok(target)
}

/// Load `dataset_info.json` from a dataset directory.
pub fn read_manifest(dir: &Path) -> Result<DatasetManifest> {
    let path = dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Err(BridgeRldsError::validation(format!(
            "missing {MANIFEST_FILE} in {}",
            dir.display()
        )));
    }
    let content = std::fs::read_to_string(&path).map_err(|e| BridgeRldsError::io(&path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| BridgeRldsError::validation(format!("invalid {MANIFEST_FILE}: {e}")))
}

/// Read every entry of one shard file.
pub fn read_shard(path: &Path) -> Result<Vec<ShardEntry>> {
    let file = File::open(path).map_err(|e| BridgeRldsError::io(path, e))?;
    let mut entries = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| BridgeRldsError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: ShardEntry = serde_json::from_str(&line).map_err(|e| {
            BridgeRldsError::validation(format!(
                "{} line {}: invalid entry: {e}",
                path.display(),
                n + 1
            ))
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Verify a dataset directory against its manifest: schema version, shard
/// presence, sizes, checksums, and episode/step counts.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn validate_dataset(dir: &Path) -> Result<DatasetManifest> {
    let manifest = read_manifest(dir)?;

    if manifest.schema_version != CURRENT_SCHEMA_VERSION {
        return Err(BridgeRldsError::validation(format!(
            "unsupported schema_version: {} (expected {})",
            manifest.schema_version, CURRENT_SCHEMA_VERSION
        )));
    }

    let mut episodes = 0;
    let mut steps = 0;
    for shard in &manifest.shards {
        let path = dir.join(&shard.filename);
        if !path.exists() {
            return Err(BridgeRldsError::validation(format!(
                "missing shard {}",
                shard.filename
            )));
        }

        let bytes = std::fs::read(&path).map_err(|e| BridgeRldsError::io(&path, e))?;
        if bytes.len() as u64 != shard.size_bytes {
            return Err(BridgeRldsError::validation(format!(
                "shard {} is {} bytes, manifest says {}",
                shard.filename,
                bytes.len(),
                shard.size_bytes
            )));
        }
        let digest = format!("{:x}", Sha256::digest(&bytes));
        if digest != shard.sha256 {
            return Err(BridgeRldsError::validation(format!(
                "checksum mismatch for shard {}",
                shard.filename
            )));
        }

        let entries = read_shard(&path)?;
        if entries.len() != shard.episodes {
            return Err(BridgeRldsError::validation(format!(
                "shard {} holds {} episodes, manifest says {}",
                shard.filename,
                entries.len(),
                shard.episodes
            )));
        }
        episodes += entries.len();
        steps += entries.iter().map(|e| e.record.steps.len()).sum::<usize>();
        debug!(shard = %shard.filename, episodes = entries.len(), "shard verified");
    }

    if episodes != manifest.episode_count || steps != manifest.step_count {
        return Err(BridgeRldsError::validation(format!(
            "dataset holds {episodes} episodes / {steps} steps, manifest says {} / {}",
            manifest.episode_count, manifest.step_count
        )));
    }

    info!(shards = manifest.shards.len(), episodes, steps, "dataset verified");
    Ok(manifest)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
