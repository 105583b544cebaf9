//! Episode directory discovery.
//!
//! Two on-disk layouts are understood:
//! - **flat**: every immediate subdirectory of the source root is one episode.
//! - **raw-tree**: the Bridge raw export, where directories named `raw` hold
//!   `<traj_group>/<traj>` episode directories at any depth below the root.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use bridge_rlds_shared::{BridgeRldsError, Result};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// Directory name marking the top of a raw trajectory tree.
const RAW_DIR_NAME: &str = "raw";

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// How episodes are arranged under the source root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryLayout {
    Flat,
    RawTree,
}

impl DiscoveryLayout {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::RawTree => "raw-tree",
        }
    }
}

impl FromStr for DiscoveryLayout {
    type Err = BridgeRldsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "flat" => Ok(Self::Flat),
            "raw-tree" | "raw_tree" => Ok(Self::RawTree),
            other => Err(BridgeRldsError::config(format!(
                "unknown discovery layout '{other}': expected 'flat' or 'raw-tree'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Find every episode directory under `root`, sorted by path.
///
/// Returns [`BridgeRldsError::NoEpisodes`] when nothing is found, since an
/// empty run is always a caller mistake (wrong root or wrong layout).
#[instrument(skip_all, fields(root = %root.display(), layout = layout.as_str()))]
pub fn discover_episodes(root: &Path, layout: DiscoveryLayout) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(BridgeRldsError::config(format!(
            "source '{}' is not a directory",
            root.display()
        )));
    }

    let mut episodes = match layout {
        DiscoveryLayout::Flat => subdirectories(root)?,
        DiscoveryLayout::RawTree => raw_tree_episodes(root)?,
    };
    episodes.sort();

    if episodes.is_empty() {
        return Err(BridgeRldsError::NoEpisodes {
            root: root.to_path_buf(),
        });
    }

    info!(count = episodes.len(), "episodes discovered");
    Ok(episodes)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Episodes of a raw tree: `<raw>/<traj_group>/<traj>` for every `raw` directory.
fn raw_tree_episodes(root: &Path) -> Result<Vec<PathBuf>> {
    let mut episodes = Vec::new();

    for raw_dir in find_raw_dirs(root) {
        debug!(raw = %raw_dir.display(), "scanning raw directory");
        for group in list_entries(&raw_dir)? {
            if !group.is_dir() {
                warn!(
                    path = %group.display(),
                    "non-directory entry where a trajectory group was expected"
                );
                continue;
            }
            for traj in list_entries(&group)? {
                if traj.is_dir() {
                    episodes.push(traj);
                } else {
                    warn!(
                        path = %traj.display(),
                        "non-directory entry where a trajectory was expected"
                    );
                }
            }
        }
    }

    Ok(episodes)
}

/// Recursively collect directories named `raw`, without descending into them.
fn find_raw_dirs(root: &Path) -> Vec<PathBuf> {
    let mut raw_dirs = Vec::new();
    let mut walker = WalkDir::new(root).follow_links(true).into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable path during discovery");
                continue;
            }
        };
        if entry.file_type().is_dir() && entry.file_name() == RAW_DIR_NAME {
            raw_dirs.push(entry.into_path());
            walker.skip_current_dir();
        }
    }

    raw_dirs
}

/// Non-hidden immediate subdirectories of `dir`.
fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(list_entries(dir)?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect())
}

/// Non-hidden entries of `dir`, sorted.
fn list_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let read = std::fs::read_dir(dir).map_err(|e| BridgeRldsError::io(dir, e))?;
    let mut entries = Vec::new();
    for entry in read {
        let entry = entry.map_err(|e| BridgeRldsError::io(dir, e))?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}
