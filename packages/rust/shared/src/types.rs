//! Core domain types: episode/step records and the dataset manifest.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SkipKind;

/// Current schema version for the dataset manifest format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Number of language instructions carried by every step.
pub const NUM_INSTRUCTIONS: usize = 3;

/// Length of one language embedding vector.
pub const EMBEDDING_DIM: usize = 512;

/// Length of the Cartesian delta action.
pub const ACTION_DIM: usize = 7;

/// Number of robot joints.
pub const JOINT_DIM: usize = 7;

// ---------------------------------------------------------------------------
// DatasetId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for dataset build identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(pub Uuid);

impl DatasetId {
    /// Generate a new time-sortable dataset identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for DatasetId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DatasetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DatasetId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One camera frame: validated JPEG bytes plus decoded dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Encoded JPEG, written as base64 in JSON.
    #[serde(with = "jpeg_base64")]
    pub jpeg: Vec<u8>,
}

mod jpeg_base64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Episode / step records
// ---------------------------------------------------------------------------

/// Observation half of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Main camera (`cam_1`).
    pub image: Frame,
    /// Wrist camera (`cam_2`).
    pub wrist_image: Frame,
    pub joint_state: [f64; JOINT_DIM],
    pub joint_state_velocity: [f64; JOINT_DIM],
    pub end_effector_pos: [f64; 3],
    /// Euler angles, extrinsic x-y-z, radians.
    pub end_effector_ori: [f64; 3],
    /// Quaternion exactly as recorded, (w, x, y, z).
    pub end_effector_ori_quat: [f64; 4],
}

/// One timestep of an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub observation: Observation,
    /// `[dx, dy, dz, droll, dpitch, dyaw, gripper_width]`.
    pub action: [f64; ACTION_DIM],
    pub action_joint_state: [f64; JOINT_DIM],
    pub action_joint_vel: [f64; JOINT_DIM],
    pub delta_des_joint_state: [f64; JOINT_DIM],
    pub action_gripper_width: f64,
    pub discount: f64,
    pub reward: f64,
    pub is_first: bool,
    pub is_last: bool,
    pub is_terminal: bool,
    pub language_instruction: String,
    pub language_instruction_2: String,
    pub language_instruction_3: String,
    /// One vector per instruction.
    pub language_embedding: Vec<Vec<f32>>,
}

/// Episode-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    /// Path of the source episode directory.
    pub file_path: String,
    pub traj_length: usize,
}

/// A fully assembled episode, ready for serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub steps: Vec<StepRecord>,
    pub episode_metadata: EpisodeMetadata,
}

// ---------------------------------------------------------------------------
// Dataset manifest
// ---------------------------------------------------------------------------

/// The `dataset_info.json` structure stored next to the shards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub schema_version: u32,
    pub id: DatasetId,
    pub name: String,
    pub version: String,
    /// Root the episodes were discovered under.
    pub source: String,
    pub tool_version: String,
    pub created_at: DateTime<Utc>,
    pub split: String,
    pub episode_count: usize,
    pub step_count: usize,
    pub shards: Vec<ShardMeta>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedEpisode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingMeta>,
    pub features: Vec<FeatureSpec>,
}

/// Metadata for a single shard file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardMeta {
    pub filename: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub episodes: usize,
}

/// An episode excluded from the dataset, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedEpisode {
    pub path: PathBuf,
    pub kind: SkipKind,
    pub detail: String,
}

/// Metadata about the embedding run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMeta {
    pub model: String,
    pub dimension: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
}

// ---------------------------------------------------------------------------
// Feature schema
// ---------------------------------------------------------------------------

/// Description of one output field, recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    /// Dotted path, e.g. `steps.observation.joint_state`.
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: String,
    pub doc: String,
}

impl FeatureSpec {
    fn new(name: &str, shape: &[usize], dtype: &str, doc: &str) -> Self {
        Self {
            name: name.into(),
            shape: shape.to_vec(),
            dtype: dtype.into(),
            doc: doc.into(),
        }
    }
}

/// Name, shape, dtype and description of every feature whose shape does not
/// depend on the run.
const FIXED_FEATURES: &[(&str, &[usize], &str, &str)] = &[
    (
        "steps.observation.joint_state",
        &[JOINT_DIM],
        "float64",
        "Joint positions, 7 joints.",
    ),
    (
        "steps.observation.joint_state_velocity",
        &[JOINT_DIM],
        "float64",
        "Joint velocities, 7 joints.",
    ),
    (
        "steps.observation.end_effector_pos",
        &[3],
        "float64",
        "End effector position in Cartesian space.",
    ),
    (
        "steps.observation.end_effector_ori",
        &[3],
        "float64",
        "End effector orientation as extrinsic xyz Euler angles.",
    ),
    (
        "steps.observation.end_effector_ori_quat",
        &[4],
        "float64",
        "End effector orientation as recorded quaternion (w, x, y, z).",
    ),
    (
        "steps.action",
        &[ACTION_DIM],
        "float64",
        "Delta action: 3x position, 3x Euler (roll, pitch, yaw), 1x desired gripper width.",
    ),
    (
        "steps.action_joint_state",
        &[JOINT_DIM],
        "float64",
        "Desired joint positions.",
    ),
    (
        "steps.action_joint_vel",
        &[JOINT_DIM],
        "float64",
        "Desired joint velocities.",
    ),
    (
        "steps.delta_des_joint_state",
        &[JOINT_DIM],
        "float64",
        "Desired joint position delta.",
    ),
    (
        "steps.action_gripper_width",
        &[],
        "float64",
        "Desired gripper width in [0, 1].",
    ),
    (
        "steps.discount",
        &[],
        "float64",
        "Discount, always 1.",
    ),
    (
        "steps.reward",
        &[],
        "float64",
        "1 on the final step of a demonstration, else 0.",
    ),
    (
        "steps.is_first",
        &[],
        "bool",
        "True on the first step.",
    ),
    (
        "steps.is_last",
        &[],
        "bool",
        "True on the last step.",
    ),
    (
        "steps.is_terminal",
        &[],
        "bool",
        "True on the last step; demonstrations always terminate.",
    ),
    (
        "steps.language_instruction",
        &[],
        "string",
        "First language instruction.",
    ),
    (
        "steps.language_instruction_2",
        &[],
        "string",
        "Second language instruction.",
    ),
    (
        "steps.language_instruction_3",
        &[],
        "string",
        "Third language instruction.",
    ),
    (
        "episode_metadata.file_path",
        &[],
        "string",
        "Path of the source episode directory.",
    ),
    (
        "episode_metadata.traj_length",
        &[],
        "int64",
        "Number of steps in the episode.",
    ),
];

/// The feature schema of every emitted episode. `image_shape` is `[h, w, 3]`
/// when frames are resized to a fixed size, empty otherwise.
/// `embedding_dim` is the width of each instruction embedding.
pub fn episode_features(image_shape: &[usize], embedding_dim: usize) -> Vec<FeatureSpec> {
    let mut features = vec![
        FeatureSpec::new(
            "steps.observation.image",
            image_shape,
            "jpeg",
            "Main camera RGB observation.",
        ),
        FeatureSpec::new(
            "steps.observation.wrist_image",
            image_shape,
            "jpeg",
            "Wrist camera RGB observation.",
        ),
    ];
    features.extend(
        FIXED_FEATURES
            .iter()
            .map(|(name, shape, dtype, doc)| FeatureSpec::new(name, shape, dtype, doc)),
    );
    features.push(FeatureSpec::new(
        "steps.language_embedding",
        &[NUM_INSTRUCTIONS, embedding_dim],
        "float32",
        "Sentence embedding of each instruction.",
    ));
    features
}
