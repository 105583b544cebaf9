//! Episode artifact reading.
//!
//! An episode directory is loaded into [`EpisodeArtifacts`]: a mapping from
//! field name to array, camera name to frames, plus the raw `lang.txt`.
//! The reader is lenient and only records what exists; the assembler decides
//! what is required. That keeps assembly testable with in-memory fixtures.
//!
//! - [`npy`]: `.npy` arrays (field name = file stem)
//! - [`pickle`]: pickled dicts / per-step dict lists
//! - [`frames`]: numbered JPEG frame directories
//! - [`lang`]: instruction parsing

pub mod frames;
pub mod lang;
pub mod npy;
pub mod pickle;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bridge_rlds_shared::{BridgeRldsError, Frame, Result};
use ndarray::ArrayD;
use tracing::{debug, instrument, warn};

pub use lang::parse_instructions;

/// File holding the language instructions.
pub const LANG_FILE: &str = "lang.txt";

/// Default camera directories: main view first, wrist view second.
pub const DEFAULT_CAMERAS: [&str; 2] = ["cam_1", "cam_2"];

// ---------------------------------------------------------------------------
// EpisodeArtifacts
// ---------------------------------------------------------------------------

/// Everything read from one episode directory.
#[derive(Debug, Clone, Default)]
pub struct EpisodeArtifacts {
    /// Episode directory.
    pub path: PathBuf,
    /// Numeric fields keyed by name.
    pub arrays: BTreeMap<String, ArrayD<f64>>,
    /// Frame sequences keyed by camera directory name.
    pub cameras: BTreeMap<String, Vec<Frame>>,
    /// Raw `lang.txt` contents, if the file exists.
    pub lang: Option<String>,
    /// `.npy` files that could not be decoded, keyed by field name.
    pub unreadable: BTreeMap<String, Unreadable>,
    /// Pickle files that could not be decoded. Any field may have lived there.
    pub unreadable_pickles: Vec<Unreadable>,
}

/// A file the reader skipped, kept so a field that turns out to be required
/// reports the decode error instead of a plain absence.
#[derive(Debug, Clone, PartialEq)]
pub struct Unreadable {
    pub path: PathBuf,
    pub message: String,
}

impl Unreadable {
    fn new(path: &Path, err: BridgeRldsError) -> Self {
        let message = match err {
            BridgeRldsError::DecodeFailure { message, .. } => message,
            other => other.to_string(),
        };
        warn!(file = %path.display(), error = %message, "ignoring unreadable file");
        Self {
            path: path.to_path_buf(),
            message,
        }
    }
}

impl EpisodeArtifacts {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Add or replace a numeric field.
    pub fn with_array(mut self, field: &str, array: ArrayD<f64>) -> Self {
        self.arrays.insert(field.to_string(), array);
        self
    }

    /// Add or replace a camera's frames.
    pub fn with_frames(mut self, camera: &str, frames: Vec<Frame>) -> Self {
        self.cameras.insert(camera.to_string(), frames);
        self
    }

    pub fn with_lang(mut self, text: impl Into<String>) -> Self {
        self.lang = Some(text.into());
        self
    }

    /// Look up a required field.
    pub fn array(&self, field: &str) -> Result<&ArrayD<f64>> {
        self.arrays.get(field).ok_or_else(|| self.absent(field))
    }

    /// The error for a required field that was not loaded: the decode
    /// failure of its own file, else of an unreadable pickle, else
    /// `MissingArtifact`.
    pub fn absent(&self, field: &str) -> BridgeRldsError {
        match self
            .unreadable
            .get(field)
            .or_else(|| self.unreadable_pickles.first())
        {
            Some(file) => BridgeRldsError::decode(&file.path, file.message.clone()),
            None => BridgeRldsError::missing(self.path.join(field)),
        }
    }

    /// Look up an optional field.
    pub fn optional_array(&self, field: &str) -> Option<&ArrayD<f64>> {
        self.arrays.get(field)
    }

    /// Look up a required camera.
    pub fn frames(&self, camera: &str) -> Result<&[Frame]> {
        self.cameras
            .get(camera)
            .map(Vec::as_slice)
            .ok_or_else(|| BridgeRldsError::missing(self.path.join(camera)))
    }

    /// The `lang.txt` contents, required.
    pub fn lang_text(&self) -> Result<&str> {
        self.lang
            .as_deref()
            .ok_or_else(|| BridgeRldsError::missing(self.path.join(LANG_FILE)))
    }
}

// ---------------------------------------------------------------------------
// Reader trait
// ---------------------------------------------------------------------------

/// Loads the artifacts of one episode.
pub trait EpisodeReader {
    fn read(&self, episode: &Path) -> Result<EpisodeArtifacts>;
}

/// Options for [`FsEpisodeReader`].
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Camera subdirectories to load.
    pub cameras: Vec<String>,
    /// Resize every frame to `(width, height)`.
    pub image_size: Option<(u32, u32)>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            cameras: DEFAULT_CAMERAS.iter().map(|c| c.to_string()).collect(),
            image_size: None,
        }
    }
}

/// Reads episodes from their on-disk directory layout.
#[derive(Debug, Clone, Default)]
pub struct FsEpisodeReader {
    options: ReadOptions,
}

impl FsEpisodeReader {
    pub fn new(options: ReadOptions) -> Self {
        Self { options }
    }
}

impl EpisodeReader for FsEpisodeReader {
    #[instrument(skip_all, fields(episode = %episode.display()))]
    fn read(&self, episode: &Path) -> Result<EpisodeArtifacts> {
        if !episode.is_dir() {
            return Err(BridgeRldsError::missing(episode));
        }

        let mut artifacts = EpisodeArtifacts::new(episode);
        let mut pickled = BTreeMap::new();

        for path in list_files(episode)? {
            let name = file_name(&path);

            if path.is_dir() {
                if self.options.cameras.iter().any(|c| *c == name) {
                    let frames = frames::read_camera(&path, self.options.image_size)?;
                    artifacts.cameras.insert(name, frames);
                } else {
                    debug!(dir = %path.display(), "ignoring unknown subdirectory");
                }
                continue;
            }

            if name == LANG_FILE {
                let bytes = std::fs::read(&path).map_err(|e| BridgeRldsError::io(&path, e))?;
                artifacts.lang = Some(String::from_utf8_lossy(&bytes).into_owned());
                continue;
            }

            match path.extension().and_then(|e| e.to_str()) {
                Some("npy") => match npy::read_npy_f64(&path) {
                    Ok(array) => {
                        artifacts.arrays.insert(file_stem(&path), array);
                    }
                    Err(e) => {
                        artifacts
                            .unreadable
                            .insert(file_stem(&path), Unreadable::new(&path, e));
                    }
                },
                Some("pkl") | Some("pickle") => match pickle::read_pickle(&path) {
                    Ok(fields) => pickled.extend(fields),
                    Err(e) => artifacts.unreadable_pickles.push(Unreadable::new(&path, e)),
                },
                None => {
                    // Extension-less files are NumPy payloads when they carry the magic.
                    let bytes = std::fs::read(&path).map_err(|e| BridgeRldsError::io(&path, e))?;
                    if !npy::is_npy(&bytes) {
                        debug!(file = %path.display(), "ignoring non-npy file without extension");
                        continue;
                    }
                    match npy::decode_npy(&path, &bytes) {
                        Ok(array) => {
                            artifacts.arrays.insert(name, array);
                        }
                        Err(e) => {
                            artifacts.unreadable.insert(name, Unreadable::new(&path, e));
                        }
                    }
                }
                Some(_) => debug!(file = %path.display(), "ignoring unrecognized file"),
            }
        }

        for (field, array) in pickled {
            artifacts.arrays.entry(field).or_insert(array);
        }

        debug!(
            arrays = artifacts.arrays.len(),
            cameras = artifacts.cameras.len(),
            has_lang = artifacts.lang.is_some(),
            unreadable = artifacts.unreadable.len() + artifacts.unreadable_pickles.len(),
            "episode artifacts read"
        );
        Ok(artifacts)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Non-hidden entries of `dir`, sorted.
fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let read = std::fs::read_dir(dir).map_err(|e| BridgeRldsError::io(dir, e))?;
    let mut paths = Vec::new();
    for entry in read {
        let path = entry.map_err(|e| BridgeRldsError::io(dir, e))?.path();
        if !file_name(&path).starts_with('.') {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
