//! End-to-end ingest over episode directories written to a temp root.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, arr0};

use bridge_rlds_core::embedding::{CachedEmbedder, Embedder};
use bridge_rlds_core::{IngestConfig, IngestResult, SilentProgress, ingest};
use bridge_rlds_discovery::DiscoveryLayout;
use bridge_rlds_shards::{ShardEntry, read_shard, validate_dataset};
use bridge_rlds_shared::{BridgeRldsError, EMBEDDING_DIM, Result, SkipKind};

fn temp_root(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("bridge-rlds-{tag}-{}", uuid::Uuid::now_v7()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_npy<A: ndarray_npy::WriteNpyExt>(dir: &Path, field: &str, array: &A) {
    ndarray_npy::write_npy(dir.join(format!("{field}.npy")), array).unwrap();
}

/// A complete `t`-step episode with identity orientations.
fn write_episode(dir: &Path, t: usize, lang: Option<&str>) {
    std::fs::create_dir_all(dir).unwrap();

    for camera in ["cam_1", "cam_2"] {
        let cam_dir = dir.join(camera);
        std::fs::create_dir_all(&cam_dir).unwrap();
        for i in 0..t {
            image::RgbImage::from_pixel(4, 2, image::Rgb([200, 40, 40]))
                .save(cam_dir.join(format!("{i}.jpeg")))
                .unwrap();
        }
    }

    let identity = Array2::from_shape_fn((t, 4), |(_, j)| if j == 0 { 1.0 } else { 0.0 });
    write_npy(dir, "traj_length", &arr0(t as i64));
    write_npy(dir, "joint_state", &Array2::from_shape_fn((t, 7), |(i, j)| (i + j) as f64));
    write_npy(dir, "joint_state_velocity", &Array2::<f64>::zeros((t, 7)));
    write_npy(dir, "end_effector_pos", &Array2::<f64>::ones((t, 3)));
    write_npy(dir, "end_effector_ori_quat", &identity);
    write_npy(dir, "delta_end_effector_pos", &Array2::from_elem((t, 3), 0.01));
    write_npy(dir, "delta_end_effector_ori", &identity);
    write_npy(dir, "des_joint_state", &Array2::from_elem((t, 7), 2.0));
    write_npy(dir, "des_joint_vel", &Array2::<f64>::zeros((t, 7)));
    write_npy(dir, "des_gripper_width", &Array1::from_elem(t, 0.5));

    if let Some(text) = lang {
        std::fs::write(dir.join("lang.txt"), text).unwrap();
    }
}

/// Replace every frame of both cameras with `t` images of `width`x`height`.
fn write_frames(dir: &Path, t: usize, width: u32, height: u32) {
    for camera in ["cam_1", "cam_2"] {
        for i in 0..t {
            image::RgbImage::from_pixel(width, height, image::Rgb([10, 120, 200]))
                .save(dir.join(camera).join(format!("{i}.jpeg")))
                .unwrap();
        }
    }
}

fn first_shard(result: &IngestResult) -> Vec<ShardEntry> {
    read_shard(&result.dataset_dir.join(&result.manifest.shards[0].filename)).unwrap()
}

fn config(source: &Path, out: &Path) -> IngestConfig {
    IngestConfig {
        source: source.to_path_buf(),
        layout: DiscoveryLayout::Flat,
        output_root: out.to_path_buf(),
        name: "bridge".into(),
        version: "1.0.0".into(),
        split: "train".into(),
        max_episodes_per_shard: 1,
        image_size: None,
        limit: None,
        tool_version: "test".into(),
        embedding_model: "stub".into(),
    }
}

/// Returns `[len(text), 0, 0, ...]` for each text.
struct LengthEmbedder;

impl Embedder for LengthEmbedder {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0; EMBEDDING_DIM];
                v[0] = t.len() as f32;
                v
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Embeds into `dimension` wide vectors and fails on one instruction.
struct ScriptedEmbedder {
    dimension: usize,
    fail_on: &'static str,
}

impl Embedder for ScriptedEmbedder {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t == self.fail_on) {
            return Err(BridgeRldsError::EmbeddingFailure(format!(
                "model rejected {:?}",
                self.fail_on
            )));
        }
        Ok(texts.iter().map(|t| vec![t.len() as f32; self.dimension]).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[test]
fn two_step_episode_end_to_end() {
    let tmp = temp_root("ingest-two-step");
    let source = tmp.join("source");
    let out = tmp.join("out");
    let ep = source.join("ep_000");
    write_episode(&ep, 2, Some("pick up the cup\n\n\n"));
    write_frames(&ep, 2, 1, 1);
    write_npy(&ep, "des_gripper_width", &Array1::from(vec![0.5, 1.0]));

    let result = ingest(&config(&source, &out), None, &SilentProgress).unwrap();
    assert_eq!(result.manifest.episode_count, 1);
    assert!(result.manifest.skipped.is_empty());

    let entries = first_shard(&result);
    let steps = &entries[0].record.steps;
    assert_eq!(steps.len(), 2);
    assert!(steps[0].is_first && !steps[0].is_last);
    assert!(steps[1].is_last && !steps[1].is_first);
    assert_eq!(steps[0].action.len(), 7);
    assert_eq!(steps[0].action[6], 0.5);
    assert_eq!(steps[1].action[6], 1.0);
    for step in steps {
        assert_eq!(step.observation.end_effector_ori, [0.0, 0.0, 0.0]);
        assert_eq!((step.observation.image.width, step.observation.image.height), (1, 1));
        assert_eq!(step.language_instruction, "pick up the cup");
        assert_eq!(step.language_instruction_2, "");
        assert_eq!(step.language_instruction_3, "");
    }

    let _ = std::fs::remove_dir_all(&tmp);
}

#[test]
fn unrelated_unreadable_arrays_do_not_skip_the_episode() {
    let tmp = temp_root("ingest-extra-arrays");
    let source = tmp.join("source");
    let out = tmp.join("out");
    let ep = source.join("ep_000");
    write_episode(&ep, 2, Some("pick up the cup"));
    write_npy(&ep, "traj_ok", &Array1::from(vec![true, true]));
    std::fs::write(ep.join("calibration.npy"), b"\x93NUMPY garbage").unwrap();

    let result = ingest(&config(&source, &out), None, &SilentProgress).unwrap();
    assert!(result.manifest.skipped.is_empty(), "{:?}", result.manifest.skipped);
    assert_eq!(result.manifest.episode_count, 1);
    assert_eq!(result.manifest.step_count, 2);

    let _ = std::fs::remove_dir_all(&tmp);
}

#[test]
fn corrupt_required_array_is_a_decode_failure() {
    let tmp = temp_root("ingest-corrupt-array");
    let source = tmp.join("source");
    let out = tmp.join("out");
    write_episode(&source.join("a"), 2, Some("pick up the cup"));
    write_episode(&source.join("b"), 2, Some("pick up the cup"));
    std::fs::write(source.join("b").join("joint_state.npy"), b"not numpy").unwrap();

    let result = ingest(&config(&source, &out), None, &SilentProgress).unwrap();
    assert_eq!(result.manifest.episode_count, 1);
    assert_eq!(result.manifest.skipped.len(), 1);
    assert_eq!(result.manifest.skipped[0].kind, SkipKind::DecodeFailure);
    assert!(result.manifest.skipped[0].detail.contains("joint_state.npy"));

    let _ = std::fs::remove_dir_all(&tmp);
}

#[test]
fn corrupt_frame_skips_only_its_episode() {
    let tmp = temp_root("ingest-corrupt-frame");
    let source = tmp.join("source");
    let out = tmp.join("out");
    write_episode(&source.join("ep_0"), 2, Some("stack the blocks"));
    write_episode(&source.join("ep_1"), 2, Some("stack the blocks"));
    write_episode(&source.join("ep_2"), 2, Some("stack the blocks"));
    std::fs::write(source.join("ep_1").join("cam_2").join("1.jpeg"), b"\xff\xd8 truncated")
        .unwrap();

    let result = ingest(&config(&source, &out), None, &SilentProgress).unwrap();
    assert_eq!(result.manifest.episode_count, 2);
    assert_eq!(result.manifest.shards.len(), 2);
    assert_eq!(result.manifest.skipped.len(), 1);
    let skipped = &result.manifest.skipped[0];
    assert_eq!(skipped.path, source.join("ep_1"));
    assert_eq!(skipped.kind, SkipKind::DecodeFailure);

    let keys: Vec<String> = result
        .manifest
        .shards
        .iter()
        .flat_map(|shard| read_shard(&result.dataset_dir.join(&shard.filename)).unwrap())
        .map(|entry| entry.key)
        .collect();
    assert_eq!(
        keys,
        vec![
            source.join("ep_0").display().to_string(),
            source.join("ep_2").display().to_string(),
        ]
    );
    validate_dataset(&result.dataset_dir).unwrap();

    let _ = std::fs::remove_dir_all(&tmp);
}

#[test]
fn embedder_error_skips_the_episode() {
    let tmp = temp_root("ingest-embed-error");
    let source = tmp.join("source");
    let out = tmp.join("out");
    write_episode(&source.join("a"), 1, Some("open the drawer"));
    write_episode(&source.join("b"), 1, Some("explode"));

    let mut cfg = config(&source, &out);
    cfg.max_episodes_per_shard = 8;
    let embedder: Box<dyn Embedder> = Box::new(ScriptedEmbedder {
        dimension: 4,
        fail_on: "explode",
    });
    let result = ingest(&cfg, Some(embedder), &SilentProgress).unwrap();

    assert_eq!(result.manifest.episode_count, 1);
    assert_eq!(result.manifest.skipped.len(), 1);
    let skipped = &result.manifest.skipped[0];
    assert_eq!(skipped.path, source.join("b"));
    assert_eq!(skipped.kind, SkipKind::EmbeddingFailure);
    assert!(skipped.detail.contains("explode"));

    // The schema reports the embedder's width, not the default.
    let feature = result
        .manifest
        .features
        .iter()
        .find(|f| f.name == "steps.language_embedding")
        .unwrap();
    assert_eq!(feature.shape, vec![3, 4]);
    assert_eq!(result.manifest.embedding.as_ref().unwrap().dimension, 4);

    let entries = first_shard(&result);
    assert_eq!(entries[0].record.steps[0].language_embedding[0].len(), 4);

    let _ = std::fs::remove_dir_all(&tmp);
}

#[test]
fn ingests_episodes_and_records_skips() {
    let tmp = temp_root("ingest");
    let source = tmp.join("source");
    let out = tmp.join("out");
    write_episode(&source.join("ep_000"), 2, Some("pick up the cup\nconfidence: 0.9\n"));
    write_episode(&source.join("ep_001"), 3, Some("pick up the cup\n"));
    write_episode(&source.join("ep_002"), 2, None);

    let result = ingest(&config(&source, &out), None, &SilentProgress).unwrap();

    assert_eq!(result.discovered, 3);
    assert_eq!(result.dataset_dir, out.join("bridge").join("1.0.0"));
    assert_eq!(result.manifest.episode_count, 2);
    assert_eq!(result.manifest.step_count, 5);
    assert_eq!(result.manifest.shards.len(), 2);
    assert!(result.manifest.embedding.is_none());

    assert_eq!(result.manifest.skipped.len(), 1);
    let skipped = &result.manifest.skipped[0];
    assert_eq!(skipped.path, source.join("ep_002"));
    assert_eq!(skipped.kind, SkipKind::MissingArtifact);

    let manifest = validate_dataset(&result.dataset_dir).unwrap();
    assert_eq!(manifest.id, result.manifest.id);

    let entries = first_shard(&result);
    assert_eq!(entries.len(), 1);
    let record = &entries[0].record;
    assert_eq!(entries[0].key, source.join("ep_000").display().to_string());
    assert_eq!(record.episode_metadata.traj_length, 2);
    assert_eq!(record.steps.len(), 2);

    let last = &record.steps[1];
    assert!(last.is_last && last.is_terminal);
    assert_eq!(last.reward, 1.0);
    assert_eq!(last.action, [0.01, 0.01, 0.01, 0.0, 0.0, 0.0, 0.5]);
    assert_eq!(last.observation.image.width, 4);
    assert_eq!(last.language_instruction, "pick up the cup");
    assert_eq!(last.language_instruction_2, "");
    assert_eq!(last.language_embedding.len(), 3);
    assert!(last.language_embedding.iter().flatten().all(|v| *v == 0.0));

    let _ = std::fs::remove_dir_all(&tmp);
}

#[test]
fn embedder_output_and_cache_stats_reach_the_dataset() {
    let tmp = temp_root("ingest-embed");
    let source = tmp.join("source");
    let out = tmp.join("out");
    write_episode(&source.join("a"), 1, Some("wipe the table\n"));
    write_episode(&source.join("b"), 2, Some("wipe the table\n"));

    let mut cfg = config(&source, &out);
    cfg.max_episodes_per_shard = 8;
    let embedder: Box<dyn Embedder> = Box::new(CachedEmbedder::new(LengthEmbedder));
    let result = ingest(&cfg, Some(embedder), &SilentProgress).unwrap();

    assert_eq!(result.manifest.shards.len(), 1);
    let meta = result.manifest.embedding.clone().unwrap();
    assert_eq!(meta.model, "stub");
    assert_eq!(meta.dimension, EMBEDDING_DIM);
    assert_eq!((meta.cache_hits, meta.cache_misses), (4, 2));

    let entries = first_shard(&result);
    let step = &entries[1].record.steps[0];
    assert_eq!(step.language_embedding[0][0], "wipe the table".len() as f32);
    assert_eq!(step.language_embedding[1][0], 0.0);

    let _ = std::fs::remove_dir_all(&tmp);
}

#[test]
fn limit_and_resize_are_applied() {
    let tmp = temp_root("ingest-limit");
    let source = tmp.join("source");
    let out = tmp.join("out");
    write_episode(&source.join("ep_0"), 1, Some("open the drawer"));
    write_episode(&source.join("ep_1"), 1, Some("close the drawer"));

    let mut cfg = config(&source, &out);
    cfg.limit = Some(1);
    cfg.image_size = Some((8, 6));
    let result = ingest(&cfg, None, &SilentProgress).unwrap();

    assert_eq!(result.discovered, 1);
    assert_eq!(result.manifest.episode_count, 1);
    let image = result
        .manifest
        .features
        .iter()
        .find(|f| f.name == "steps.observation.image")
        .unwrap();
    assert_eq!(image.shape, vec![6, 8, 3]);

    let entries = first_shard(&result);
    let frame = &entries[0].record.steps[0].observation.wrist_image;
    assert_eq!((frame.width, frame.height), (8, 6));

    let _ = std::fs::remove_dir_all(&tmp);
}

#[test]
fn empty_source_is_fatal() {
    let tmp = temp_root("ingest-empty");
    let err = ingest(&config(&tmp, &tmp.join("out")), None, &SilentProgress).unwrap_err();
    assert!(matches!(err, BridgeRldsError::NoEpisodes { .. }));
    let _ = std::fs::remove_dir_all(&tmp);
}

#[test]
fn rerun_replaces_previous_shards() {
    let tmp = temp_root("ingest-rerun");
    let source = tmp.join("source");
    let out = tmp.join("out");
    for name in ["x", "y", "z"] {
        write_episode(&source.join(name), 1, Some("push the block"));
    }

    let first = ingest(&config(&source, &out), None, &SilentProgress).unwrap();
    assert_eq!(first.manifest.shards.len(), 3);

    let mut cfg = config(&source, &out);
    cfg.max_episodes_per_shard = 3;
    let second = ingest(&cfg, None, &SilentProgress).unwrap();
    assert_eq!(second.manifest.shards.len(), 1);

    let shard_files = std::fs::read_dir(&second.dataset_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".jsonl-"))
        .count();
    assert_eq!(shard_files, 1);
    validate_dataset(&second.dataset_dir).unwrap();

    let _ = std::fs::remove_dir_all(&tmp);
}
