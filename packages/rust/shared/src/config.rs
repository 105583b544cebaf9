//! Application configuration for bridge-rlds.
//!
//! User config lives at `~/.bridge-rlds/bridge-rlds.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BridgeRldsError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "bridge-rlds.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".bridge-rlds";

// ---------------------------------------------------------------------------
// Config structs (matching bridge-rlds.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Frame preprocessing.
    #[serde(default)]
    pub images: ImagesConfig,

    /// Language embedding bridge.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory datasets are written under.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Dataset name, used for the output directory and shard prefixes.
    #[serde(default = "default_dataset_name")]
    pub dataset_name: String,

    /// Dataset version directory.
    #[serde(default = "default_version")]
    pub version: String,

    /// Split written by `ingest`.
    #[serde(default = "default_split")]
    pub split: String,

    /// Episode discovery layout: "flat" or "raw-tree".
    #[serde(default = "default_layout")]
    pub layout: String,

    /// Episodes per shard file.
    #[serde(default = "default_shard_size")]
    pub max_episodes_per_shard: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            dataset_name: default_dataset_name(),
            version: default_version(),
            split: default_split(),
            layout: default_layout(),
            max_episodes_per_shard: default_shard_size(),
        }
    }
}

fn default_output_dir() -> String {
    "~/bridge-rlds-datasets".into()
}
fn default_dataset_name() -> String {
    "bridge".into()
}
fn default_version() -> String {
    "1.0.0".into()
}
fn default_split() -> String {
    "train".into()
}
fn default_layout() -> String {
    "flat".into()
}
fn default_shard_size() -> usize {
    16
}

/// `[images]` section. Frames keep their native size unless both are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl ImagesConfig {
    /// Target `(width, height)` when resizing is configured.
    pub fn target_size(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some((w, h)),
            _ => None,
        }
    }
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Spawn the embedding bridge during ingest. When false, zero vectors are used.
    #[serde(default)]
    pub enabled: bool,

    /// Bridge executable (e.g. "python3").
    #[serde(default = "default_bridge_cmd")]
    pub bridge_cmd: String,

    /// Arguments passed to the bridge executable.
    #[serde(default = "default_bridge_args")]
    pub bridge_args: Vec<String>,

    /// Working directory for the bridge subprocess.
    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    /// Model identifier recorded in the dataset manifest.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Expected vector length.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bridge_cmd: default_bridge_cmd(),
            bridge_args: default_bridge_args(),
            working_dir: default_working_dir(),
            model: default_embedding_model(),
            dimension: default_dimension(),
        }
    }
}

fn default_bridge_cmd() -> String {
    "python3".into()
}
fn default_bridge_args() -> Vec<String> {
    vec!["packages/py/embedding-bridge/bridge.py".into()]
}
fn default_working_dir() -> String {
    ".".into()
}
fn default_embedding_model() -> String {
    "universal-sentence-encoder-large/5".into()
}
fn default_dimension() -> usize {
    512
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.bridge-rlds/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BridgeRldsError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.bridge-rlds/bridge-rlds.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BridgeRldsError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        BridgeRldsError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BridgeRldsError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| BridgeRldsError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BridgeRldsError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
