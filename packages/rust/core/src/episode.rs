//! Per-episode record assembly.
//!
//! Joins an episode's artifacts into one [`EpisodeRecord`]: every per-step
//! array is validated against `traj_length`, orientations are converted to
//! Euler angles, the language instructions are embedded once and copied onto
//! every step, and boundary flags are derived from the step index.
//!
//! Failures never escape [`EpisodeIngestor::ingest`]; they become an explicit
//! [`EpisodeOutcome::Skipped`] so one bad directory cannot stop a batch.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use bridge_rlds_reader::{DEFAULT_CAMERAS, EpisodeArtifacts, EpisodeReader, parse_instructions};
use bridge_rlds_shared::{
    ACTION_DIM, BridgeRldsError, EMBEDDING_DIM, EpisodeMetadata, EpisodeRecord, Frame, JOINT_DIM,
    NUM_INSTRUCTIONS, Observation, Result, SkipKind, SkippedEpisode, StepRecord,
};

use crate::embedding::{Embedder, validate_embeddings, zero_embeddings};
use crate::rotation::euler_xyz_from_wxyz;

// Source field names.
const TRAJ_LENGTH: &str = "traj_length";
const JOINT_STATE: &str = "joint_state";
const JOINT_STATE_VELOCITY: &str = "joint_state_velocity";
const EE_POS: &str = "end_effector_pos";
const EE_ORI: &str = "end_effector_ori";
const EE_ORI_QUAT: &str = "end_effector_ori_quat";
const DELTA_EE_POS: &str = "delta_end_effector_pos";
const DELTA_EE_ORI: &str = "delta_end_effector_ori";
const DES_JOINT_STATE: &str = "des_joint_state";
const DES_JOINT_VEL: &str = "des_joint_vel";
const DELTA_DES_JOINT_STATE: &str = "delta_des_joint_state";
const DES_GRIPPER_WIDTH: &str = "des_gripper_width";

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of ingesting one episode directory.
#[derive(Debug)]
pub enum EpisodeOutcome {
    /// A complete record, keyed by its source path.
    Ingested { key: String, record: EpisodeRecord },
    /// The episode was left out, with the reason.
    Skipped { path: PathBuf, reason: SkippedEpisode },
}

impl EpisodeOutcome {
    fn skipped(path: &Path, kind: SkipKind, detail: impl Into<String>) -> Self {
        let reason = SkippedEpisode {
            path: path.to_path_buf(),
            kind,
            detail: detail.into(),
        };
        warn!(path = %path.display(), kind = %kind, detail = %reason.detail, "skipping episode");
        Self::Skipped {
            path: path.to_path_buf(),
            reason,
        }
    }
}

// ---------------------------------------------------------------------------
// Ingestor
// ---------------------------------------------------------------------------

/// Turns episode directories into records.
///
/// With no embedder, every step carries zero embeddings of
/// [`EMBEDDING_DIM`] width.
pub struct EpisodeIngestor<R> {
    reader: R,
    embedder: Option<Box<dyn Embedder>>,
}

impl<R: EpisodeReader> EpisodeIngestor<R> {
    pub fn new(reader: R, embedder: Option<Box<dyn Embedder>>) -> Self {
        Self { reader, embedder }
    }

    /// Width of the language embedding vectors this ingestor produces.
    pub fn embedding_dimension(&self) -> usize {
        self.embedder
            .as_ref()
            .map_or(EMBEDDING_DIM, |e| e.dimension())
    }

    /// Embedding cache `(hits, misses)`, if an embedder is present.
    pub fn cache_stats(&self) -> Option<(usize, usize)> {
        self.embedder.as_ref().map(|e| e.cache_stats())
    }

    /// Shut down the embedder, if any.
    pub fn finish(&mut self) -> Result<()> {
        match self.embedder.as_mut() {
            Some(embedder) => embedder.finish(),
            None => Ok(()),
        }
    }

    /// Read and assemble one episode. Never fails; errors become skips.
    #[instrument(skip_all, fields(episode = %path.display()))]
    pub fn ingest(&mut self, path: &Path) -> EpisodeOutcome {
        let artifacts = match self.reader.read(path) {
            Ok(artifacts) => artifacts,
            Err(e) => return EpisodeOutcome::skipped(path, e.skip_kind(), e.to_string()),
        };

        match self.assemble(artifacts) {
            Ok(Some(record)) => {
                debug!(steps = record.steps.len(), "episode assembled");
                EpisodeOutcome::Ingested {
                    key: path.display().to_string(),
                    record,
                }
            }
            Ok(None) => EpisodeOutcome::skipped(
                path,
                SkipKind::EmptyTrajectory,
                "traj_length is 0; nothing to emit",
            ),
            Err(e) => EpisodeOutcome::skipped(path, e.skip_kind(), e.to_string()),
        }
    }

    /// Assemble a record from already-loaded artifacts.
    ///
    /// Returns `Ok(None)` for a zero-length trajectory.
    pub fn assemble(&mut self, mut artifacts: EpisodeArtifacts) -> Result<Option<EpisodeRecord>> {
        let t = traj_length(&artifacts)?;
        if t == 0 {
            return Ok(None);
        }

        let instructions = parse_instructions(artifacts.lang_text()?);
        let columns = Columns::load(&artifacts, t)?;
        let images = take_frames(&mut artifacts, DEFAULT_CAMERAS[0], t)?;
        let wrist_images = take_frames(&mut artifacts, DEFAULT_CAMERAS[1], t)?;

        // Embedding last so broken episodes never reach the model.
        let embedding = self.embed(&instructions)?;

        let steps = images
            .into_iter()
            .zip(wrist_images)
            .enumerate()
            .map(|(i, (image, wrist_image))| {
                columns.step(i, t, image, wrist_image, &instructions, &embedding)
            })
            .collect();

        Ok(Some(EpisodeRecord {
            steps,
            episode_metadata: EpisodeMetadata {
                file_path: artifacts.path.display().to_string(),
                traj_length: t,
            },
        }))
    }

    fn embed(&mut self, instructions: &[String; NUM_INSTRUCTIONS]) -> Result<Vec<Vec<f32>>> {
        match self.embedder.as_mut() {
            Some(embedder) => {
                let vectors = embedder.embed(instructions)?;
                validate_embeddings(&vectors, NUM_INSTRUCTIONS, embedder.dimension())?;
                Ok(vectors)
            }
            None => Ok(zero_embeddings(EMBEDDING_DIM)),
        }
    }
}

// ---------------------------------------------------------------------------
// Columns
// ---------------------------------------------------------------------------

/// Every numeric per-step column of an episode, validated to length `t`.
struct Columns {
    joint_state: Vec<[f64; JOINT_DIM]>,
    joint_state_velocity: Vec<[f64; JOINT_DIM]>,
    ee_pos: Vec<[f64; 3]>,
    ee_quat: Vec<[f64; 4]>,
    ee_euler: Vec<[f64; 3]>,
    delta_pos: Vec<[f64; 3]>,
    delta_euler: Vec<[f64; 3]>,
    des_joint_state: Vec<[f64; JOINT_DIM]>,
    des_joint_vel: Vec<[f64; JOINT_DIM]>,
    delta_des_joint_state: Vec<[f64; JOINT_DIM]>,
    gripper_width: Vec<f64>,
}

impl Columns {
    fn load(artifacts: &EpisodeArtifacts, t: usize) -> Result<Self> {
        let joint_state = per_step::<JOINT_DIM>(artifacts, JOINT_STATE, t)?;
        let des_joint_state = per_step::<JOINT_DIM>(artifacts, DES_JOINT_STATE, t)?;

        let delta_des_joint_state = match artifacts.optional_array(DELTA_DES_JOINT_STATE) {
            Some(_) => per_step::<JOINT_DIM>(artifacts, DELTA_DES_JOINT_STATE, t)?,
            None => des_joint_state
                .iter()
                .zip(&joint_state)
                .map(|(des, cur)| std::array::from_fn(|j| des[j] - cur[j]))
                .collect(),
        };

        let (quat_field, ee_quat) = orientation_quats(artifacts, t)?;
        let ee_euler = ee_quat
            .iter()
            .map(|q| euler_xyz_from_wxyz(quat_field, *q))
            .collect::<Result<Vec<_>>>()?;

        let delta_euler = per_step::<4>(artifacts, DELTA_EE_ORI, t)?
            .into_iter()
            .map(|q| euler_xyz_from_wxyz(DELTA_EE_ORI, q))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            joint_state_velocity: per_step::<JOINT_DIM>(artifacts, JOINT_STATE_VELOCITY, t)?,
            ee_pos: per_step::<3>(artifacts, EE_POS, t)?,
            delta_pos: per_step::<3>(artifacts, DELTA_EE_POS, t)?,
            des_joint_vel: per_step::<JOINT_DIM>(artifacts, DES_JOINT_VEL, t)?,
            gripper_width: per_step_scalar(artifacts, DES_GRIPPER_WIDTH, t)?,
            joint_state,
            ee_quat,
            ee_euler,
            delta_euler,
            des_joint_state,
            delta_des_joint_state,
        })
    }

    fn step(
        &self,
        i: usize,
        t: usize,
        image: Frame,
        wrist_image: Frame,
        instructions: &[String; NUM_INSTRUCTIONS],
        embedding: &[Vec<f32>],
    ) -> StepRecord {
        let is_last = i + 1 == t;
        let [dx, dy, dz] = self.delta_pos[i];
        let [droll, dpitch, dyaw] = self.delta_euler[i];
        let gripper = self.gripper_width[i];
        let action: [f64; ACTION_DIM] = [dx, dy, dz, droll, dpitch, dyaw, gripper];
        let [first, second, third] = instructions.clone();

        StepRecord {
            observation: Observation {
                image,
                wrist_image,
                joint_state: self.joint_state[i],
                joint_state_velocity: self.joint_state_velocity[i],
                end_effector_pos: self.ee_pos[i],
                end_effector_ori: self.ee_euler[i],
                end_effector_ori_quat: self.ee_quat[i],
            },
            action,
            action_joint_state: self.des_joint_state[i],
            action_joint_vel: self.des_joint_vel[i],
            delta_des_joint_state: self.delta_des_joint_state[i],
            action_gripper_width: gripper,
            discount: 1.0,
            reward: if is_last { 1.0 } else { 0.0 },
            is_first: i == 0,
            is_last,
            is_terminal: is_last,
            language_instruction: first,
            language_instruction_2: second,
            language_instruction_3: third,
            language_embedding: embedding.to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// `traj_length` as a non-negative integer.
fn traj_length(artifacts: &EpisodeArtifacts) -> Result<usize> {
    let array = artifacts.array(TRAJ_LENGTH)?;
    let mut values = array.iter().copied();
    let (Some(value), None) = (values.next(), values.next()) else {
        return Err(BridgeRldsError::invalid(
            TRAJ_LENGTH,
            format!("expected a single value, found shape {:?}", array.shape()),
        ));
    };
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return Err(BridgeRldsError::invalid(
            TRAJ_LENGTH,
            format!("{value} is not a non-negative integer"),
        ));
    }
    Ok(value as usize)
}

/// A `[t, N]` field as one fixed-width row per step.
fn per_step<const N: usize>(
    artifacts: &EpisodeArtifacts,
    field: &str,
    t: usize,
) -> Result<Vec<[f64; N]>> {
    let array = artifacts.array(field)?;
    if array.shape() != [t, N].as_slice() {
        return Err(BridgeRldsError::shape(
            field,
            format!("[{t}, {N}]"),
            format!("{:?}", array.shape()),
        ));
    }
    let flat: Vec<f64> = array.iter().copied().collect();
    Ok(flat
        .chunks_exact(N)
        .map(|row| std::array::from_fn(|j| row[j]))
        .collect())
}

/// A `[t]` or `[t, 1]` field as one value per step.
fn per_step_scalar(artifacts: &EpisodeArtifacts, field: &str, t: usize) -> Result<Vec<f64>> {
    let array = artifacts.array(field)?;
    match array.shape() {
        [n] | [n, 1] if *n == t => Ok(array.iter().copied().collect()),
        shape => Err(BridgeRldsError::shape(
            field,
            format!("[{t}] or [{t}, 1]"),
            format!("{shape:?}"),
        )),
    }
}

/// End-effector quaternions, preferring the dedicated field and falling back
/// to a four-wide `end_effector_ori`.
fn orientation_quats(
    artifacts: &EpisodeArtifacts,
    t: usize,
) -> Result<(&'static str, Vec<[f64; 4]>)> {
    if artifacts.optional_array(EE_ORI_QUAT).is_some() {
        return Ok((EE_ORI_QUAT, per_step::<4>(artifacts, EE_ORI_QUAT, t)?));
    }
    match artifacts.optional_array(EE_ORI) {
        Some(array) if array.shape().last() == Some(&4) => {
            Ok((EE_ORI, per_step::<4>(artifacts, EE_ORI, t)?))
        }
        _ => Err(artifacts.absent(EE_ORI_QUAT)),
    }
}

/// Move a camera's frames out of the artifacts, checking the count.
fn take_frames(artifacts: &mut EpisodeArtifacts, camera: &str, t: usize) -> Result<Vec<Frame>> {
    let actual = artifacts.frames(camera)?.len();
    if actual != t {
        return Err(BridgeRldsError::shape(
            camera,
            format!("{t} frames"),
            format!("{actual} frames"),
        ));
    }
    Ok(artifacts.cameras.remove(camera).unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use ndarray::{ArrayD, IxDyn};

    /// Serves prepared artifacts by path.
    struct MemoryReader(HashMap<PathBuf, EpisodeArtifacts>);

    impl EpisodeReader for MemoryReader {
        fn read(&self, episode: &Path) -> Result<EpisodeArtifacts> {
            self.0
                .get(episode)
                .cloned()
                .ok_or_else(|| BridgeRldsError::missing(episode))
        }
    }

    struct ConstEmbedder;

    impl Embedder for ConstEmbedder {
        fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32; 4]).collect())
        }
        fn dimension(&self) -> usize {
            4
        }
    }

    fn array(shape: &[usize], values: Vec<f64>) -> ArrayD<f64> {
        ArrayD::from_shape_vec(IxDyn(shape), values).unwrap()
    }

    fn filled(shape: &[usize], value: f64) -> ArrayD<f64> {
        ArrayD::from_elem(IxDyn(shape), value)
    }

    fn frame() -> Frame {
        Frame {
            width: 1,
            height: 1,
            jpeg: vec![0xff, 0xd8, 0xff, 0xd9],
        }
    }

    fn identity_quats(t: usize) -> ArrayD<f64> {
        let mut values = Vec::new();
        for _ in 0..t {
            values.extend([1.0, 0.0, 0.0, 0.0]);
        }
        array(&[t, 4], values)
    }

    /// A complete synthetic episode of `t` steps.
    fn synthetic(path: &str, t: usize) -> EpisodeArtifacts {
        EpisodeArtifacts::new(path)
            .with_array(TRAJ_LENGTH, array(&[], vec![t as f64]))
            .with_array(JOINT_STATE, filled(&[t, 7], 0.25))
            .with_array(JOINT_STATE_VELOCITY, filled(&[t, 7], 0.0))
            .with_array(EE_POS, filled(&[t, 3], 0.1))
            .with_array(EE_ORI_QUAT, identity_quats(t))
            .with_array(DELTA_EE_POS, filled(&[t, 3], 0.01))
            .with_array(DELTA_EE_ORI, identity_quats(t))
            .with_array(DES_JOINT_STATE, filled(&[t, 7], 1.0))
            .with_array(DES_JOINT_VEL, filled(&[t, 7], 0.0))
            .with_array(DES_GRIPPER_WIDTH, filled(&[t], 0.5))
            .with_frames("cam_1", vec![frame(); t])
            .with_frames("cam_2", vec![frame(); t])
            .with_lang("take the silver pot and place it on the top left burner\nconfidence: 1\n")
    }

    fn ingestor(
        episodes: Vec<EpisodeArtifacts>,
        embedder: Option<Box<dyn Embedder>>,
    ) -> EpisodeIngestor<MemoryReader> {
        let map = episodes.into_iter().map(|a| (a.path.clone(), a)).collect();
        EpisodeIngestor::new(MemoryReader(map), embedder)
    }

    fn expect_record(outcome: EpisodeOutcome) -> (String, EpisodeRecord) {
        match outcome {
            EpisodeOutcome::Ingested { key, record } => (key, record),
            EpisodeOutcome::Skipped { reason, .. } => panic!("unexpected skip: {reason:?}"),
        }
    }

    fn expect_skip(outcome: EpisodeOutcome) -> SkippedEpisode {
        match outcome {
            EpisodeOutcome::Skipped { reason, .. } => reason,
            EpisodeOutcome::Ingested { key, .. } => panic!("unexpected record for {key}"),
        }
    }

    #[test]
    fn produces_one_step_per_timestep_with_flags() {
        let mut ingestor = ingestor(vec![synthetic("/data/ep0", 5)], None);
        let (key, record) = expect_record(ingestor.ingest(Path::new("/data/ep0")));

        assert_eq!(key, "/data/ep0");
        assert_eq!(record.steps.len(), 5);
        assert_eq!(record.episode_metadata.traj_length, 5);
        assert_eq!(record.episode_metadata.file_path, "/data/ep0");

        for (i, step) in record.steps.iter().enumerate() {
            assert_eq!(step.is_first, i == 0);
            assert_eq!(step.is_last, i == 4);
            assert_eq!(step.is_terminal, i == 4);
            assert_eq!(step.reward, if i == 4 { 1.0 } else { 0.0 });
            assert_eq!(step.discount, 1.0);
            assert_eq!(step.action.len(), 7);
        }
    }

    #[test]
    fn two_step_scenario() {
        let mut artifacts = synthetic("/data/ep1", 2);
        artifacts = artifacts.with_array(DES_GRIPPER_WIDTH, array(&[2], vec![0.5, 1.0]));
        let mut ingestor = ingestor(vec![artifacts], None);
        let (_, record) = expect_record(ingestor.ingest(Path::new("/data/ep1")));

        let steps = &record.steps;
        assert_eq!(steps.len(), 2);
        assert!(steps[0].is_first && !steps[0].is_last && steps[0].reward == 0.0);
        assert!(!steps[1].is_first && steps[1].is_last && steps[1].reward == 1.0);
        assert_eq!(steps[0].action[6], 0.5);
        assert_eq!(steps[1].action[6], 1.0);
        assert_eq!(steps[1].action_gripper_width, 1.0);
        assert_eq!(&steps[0].action[..3], &[0.01, 0.01, 0.01]);
        assert!(steps[0].action[3..6].iter().all(|a| a.abs() < 1e-12));
        assert!(steps[0].observation.end_effector_ori.iter().all(|a| a.abs() < 1e-12));
        assert_eq!(steps[0].observation.end_effector_ori_quat, [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(
            steps[0].language_instruction,
            "take the silver pot and place it on the top left burner"
        );
        assert_eq!(steps[0].language_instruction_2, "");
        assert_eq!(steps[0].language_instruction_3, "");
        assert_eq!(steps[0].language_embedding.len(), 3);
        assert!(steps[0].language_embedding.iter().all(|v| v.len() == 512));
        assert_eq!(steps[0].observation.image, frame());
    }

    #[test]
    fn delta_joint_state_is_derived_when_absent() {
        let mut ingestor = ingestor(vec![synthetic("/data/ep", 3)], None);
        let (_, record) = expect_record(ingestor.ingest(Path::new("/data/ep")));
        assert_eq!(record.steps[2].delta_des_joint_state, [0.75; 7]);
    }

    #[test]
    fn recorded_delta_joint_state_wins() {
        let artifacts =
            synthetic("/data/ep", 2).with_array(DELTA_DES_JOINT_STATE, filled(&[2, 7], -2.0));
        let mut ingestor = ingestor(vec![artifacts], None);
        let (_, record) = expect_record(ingestor.ingest(Path::new("/data/ep")));
        assert_eq!(record.steps[0].delta_des_joint_state, [-2.0; 7]);
    }

    #[test]
    fn quaternion_falls_back_to_four_wide_orientation() {
        let mut artifacts = synthetic("/data/ep", 2);
        artifacts.arrays.remove(EE_ORI_QUAT);
        let half = 0.15f64;
        let q = [half.cos(), half.sin(), 0.0, 0.0];
        let artifacts = artifacts.with_array(EE_ORI, array(&[2, 4], [q, q].concat()));

        let mut ingestor = ingestor(vec![artifacts], None);
        let (_, record) = expect_record(ingestor.ingest(Path::new("/data/ep")));
        let euler = record.steps[1].observation.end_effector_ori;
        assert!((euler[0] - 0.3).abs() < 1e-9 && euler[1].abs() < 1e-9 && euler[2].abs() < 1e-9);
        assert_eq!(record.steps[1].observation.end_effector_ori_quat, q);
    }

    #[test]
    fn missing_lang_is_skipped_and_batch_continues() {
        let mut broken = synthetic("/data/a", 2);
        broken.lang = None;
        let mut ingestor = ingestor(vec![broken, synthetic("/data/b", 2)], None);

        let reason = expect_skip(ingestor.ingest(Path::new("/data/a")));
        assert_eq!(reason.kind, SkipKind::MissingArtifact);
        assert!(reason.detail.contains("lang.txt"));
        assert_eq!(reason.path, PathBuf::from("/data/a"));

        let (_, record) = expect_record(ingestor.ingest(Path::new("/data/b")));
        assert_eq!(record.steps.len(), 2);
    }

    #[test]
    fn short_joint_state_is_shape_mismatch() {
        let artifacts = synthetic("/data/ep", 3).with_array(JOINT_STATE, filled(&[2, 7], 0.0));
        let mut ingestor = ingestor(vec![artifacts], None);
        let reason = expect_skip(ingestor.ingest(Path::new("/data/ep")));
        assert_eq!(reason.kind, SkipKind::ShapeMismatch);
        assert!(reason.detail.contains("joint_state"));
    }

    #[test]
    fn frame_count_mismatch_is_shape_mismatch() {
        let artifacts = synthetic("/data/ep", 3).with_frames("cam_2", vec![frame(); 2]);
        let mut ingestor = ingestor(vec![artifacts], None);
        let reason = expect_skip(ingestor.ingest(Path::new("/data/ep")));
        assert_eq!(reason.kind, SkipKind::ShapeMismatch);
        assert!(reason.detail.contains("cam_2"));
    }

    #[test]
    fn gripper_width_accepts_column_vector() {
        let artifacts =
            synthetic("/data/ep", 2).with_array(DES_GRIPPER_WIDTH, filled(&[2, 1], 0.8));
        let mut ingestor = ingestor(vec![artifacts], None);
        let (_, record) = expect_record(ingestor.ingest(Path::new("/data/ep")));
        assert_eq!(record.steps[1].action[6], 0.8);
    }

    #[test]
    fn traj_length_edge_cases() {
        let zero = synthetic("/data/zero", 0);
        let negative = synthetic("/data/neg", 2).with_array(TRAJ_LENGTH, array(&[1], vec![-1.0]));
        let fractional = synthetic("/data/frac", 2).with_array(TRAJ_LENGTH, array(&[], vec![2.5]));
        let mut absent = synthetic("/data/absent", 2);
        absent.arrays.remove(TRAJ_LENGTH);

        let mut ingestor = ingestor(vec![zero, negative, fractional, absent], None);
        let kind = |ingestor: &mut EpisodeIngestor<MemoryReader>, p: &str| {
            expect_skip(ingestor.ingest(Path::new(p))).kind
        };
        assert_eq!(kind(&mut ingestor, "/data/zero"), SkipKind::EmptyTrajectory);
        assert_eq!(kind(&mut ingestor, "/data/neg"), SkipKind::InvalidValue);
        assert_eq!(kind(&mut ingestor, "/data/frac"), SkipKind::InvalidValue);
        assert_eq!(kind(&mut ingestor, "/data/absent"), SkipKind::MissingArtifact);
    }

    #[test]
    fn zero_quaternion_is_invalid_value() {
        let artifacts = synthetic("/data/ep", 1).with_array(DELTA_EE_ORI, filled(&[1, 4], 0.0));
        let mut ingestor = ingestor(vec![artifacts], None);
        let reason = expect_skip(ingestor.ingest(Path::new("/data/ep")));
        assert_eq!(reason.kind, SkipKind::InvalidValue);
    }

    #[test]
    fn unreadable_directory_is_skipped() {
        let mut ingestor = ingestor(Vec::new(), None);
        let reason = expect_skip(ingestor.ingest(Path::new("/data/nowhere")));
        assert_eq!(reason.kind, SkipKind::MissingArtifact);
    }

    #[test]
    fn embedder_output_is_copied_to_every_step() {
        let mut ingestor = ingestor(vec![synthetic("/data/ep", 3)], Some(Box::new(ConstEmbedder)));
        assert_eq!(ingestor.embedding_dimension(), 4);

        let (_, record) = expect_record(ingestor.ingest(Path::new("/data/ep")));
        for step in &record.steps {
            assert_eq!(step.language_embedding[0], vec![55.0; 4]);
            assert_eq!(step.language_embedding[1], vec![0.0; 4]);
        }
        assert_eq!(ingestor.cache_stats(), Some((0, 0)));
        ingestor.finish().unwrap();
    }

    #[test]
    fn wrong_embedder_output_is_embedding_failure() {
        struct TwoVectors;
        impl Embedder for TwoVectors {
            fn embed(&mut self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(vec![vec![0.0; 4]; 2])
            }
            fn dimension(&self) -> usize {
                4
            }
        }

        let mut ingestor = ingestor(vec![synthetic("/data/ep", 2)], Some(Box::new(TwoVectors)));
        let reason = expect_skip(ingestor.ingest(Path::new("/data/ep")));
        assert_eq!(reason.kind, SkipKind::EmbeddingFailure);
    }
}
