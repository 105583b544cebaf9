//! Error types for bridge-rlds.
//!
//! Library crates use [`BridgeRldsError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for all bridge-rlds operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeRldsError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A required episode file or subdirectory is absent.
    #[error("missing artifact: {}", path.display())]
    MissingArtifact { path: PathBuf },

    /// A per-timestep array does not have the shape the trajectory requires.
    #[error("shape mismatch for `{field}`: expected {expected}, found {actual}")]
    ShapeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    /// An image or array file could not be decoded.
    #[error("decode failure at {}: {message}", path.display())]
    DecodeFailure { path: PathBuf, message: String },

    /// The embedding backend failed or returned malformed vectors.
    #[error("embedding failure: {0}")]
    EmbeddingFailure(String),

    /// A field holds a value outside its domain (negative length, zero quaternion, ...).
    #[error("invalid value for `{field}`: {message}")]
    InvalidValue { field: String, message: String },

    /// Discovery found nothing to ingest.
    #[error("no episode directories found under {}", root.display())]
    NoEpisodes { root: PathBuf },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (manifest mismatch, checksum, malformed input table).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Chart rendering error.
    #[error("plot error: {0}")]
    Plot(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BridgeRldsError>;

impl BridgeRldsError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// A required artifact at `path` does not exist.
    pub fn missing(path: impl Into<PathBuf>) -> Self {
        Self::MissingArtifact { path: path.into() }
    }

    /// An array shape differs from what the trajectory demands.
    pub fn shape(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ShapeMismatch {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// A file at `path` could not be decoded.
    pub fn decode(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::DecodeFailure {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// A field holds a value outside its domain.
    pub fn invalid(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Classify this error for the per-episode skip report.
    pub fn skip_kind(&self) -> SkipKind {
        match self {
            Self::MissingArtifact { .. } => SkipKind::MissingArtifact,
            Self::ShapeMismatch { .. } => SkipKind::ShapeMismatch,
            Self::DecodeFailure { .. } => SkipKind::DecodeFailure,
            Self::EmbeddingFailure(_) => SkipKind::EmbeddingFailure,
            Self::InvalidValue { .. } => SkipKind::InvalidValue,
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                SkipKind::MissingArtifact
            }
            _ => SkipKind::Unreadable,
        }
    }
}

/// Why an episode was left out of the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipKind {
    MissingArtifact,
    ShapeMismatch,
    DecodeFailure,
    EmbeddingFailure,
    InvalidValue,
    /// `traj_length` is zero; nothing to emit.
    EmptyTrajectory,
    /// Any other read failure inside the episode directory.
    Unreadable,
}

impl SkipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingArtifact => "missing_artifact",
            Self::ShapeMismatch => "shape_mismatch",
            Self::DecodeFailure => "decode_failure",
            Self::EmbeddingFailure => "embedding_failure",
            Self::InvalidValue => "invalid_value",
            Self::EmptyTrajectory => "empty_trajectory",
            Self::Unreadable => "unreadable",
        }
    }
}

impl std::fmt::Display for SkipKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
