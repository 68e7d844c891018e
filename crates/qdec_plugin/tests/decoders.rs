//! Contract tests for the reference decoders.
//!
//! Every test builds decoders through the registry, exactly as a worker
//! would, and talks to them only through files.

use qdec_common::BatchShape;
use qdec_core::ProtocolError;
use qdec_plugin::{DecodeTask, DecoderConfig, DecoderRegistry};
use std::fs;
use std::path::Path;
use std::thread;
use tempfile::TempDir;

/// Distance-5 repetition code: D0..D3 in a line, L0 crosses the left edge.
const REPETITION_DEM: &str = "\
error(0.1) D0 L0
error(0.1) D0 D1
error(0.1) D1 D2
error(0.1) D2 D3
error(0.1) D3
";

fn task_in(dir: &Path, shape: BatchShape, dem: &str, dets: &[u8]) -> DecodeTask {
    let tmp_dir = dir.join("scratch");
    fs::create_dir_all(&tmp_dir).unwrap();
    let dem_path = dir.join("model.dem");
    fs::write(&dem_path, dem).unwrap();
    let dets_path = dir.join("dets.b8");
    fs::write(&dets_path, dets).unwrap();
    DecodeTask {
        shape,
        dem_path,
        dets_b8_in_path: dets_path,
        obs_predictions_b8_out_path: dir.join("obs.b8"),
        tmp_dir,
    }
}

fn run(config: &DecoderConfig, task: &DecodeTask) -> Result<Vec<u8>, ProtocolError> {
    let decoder = DecoderRegistry::with_builtins().build(config)?;
    decoder.decode_via_files(task)?;
    Ok(fs::read(&task.obs_predictions_b8_out_path).unwrap())
}

#[test]
fn prior_decoder_flips_every_observable_under_certain_error() {
    let dir = TempDir::new().unwrap();
    let task = task_in(
        dir.path(),
        BatchShape::new(3, 5, 2),
        "error(1) L0 L1\ndetector D4\n",
        &[0b0000_1011, 0b0000_0000, 0b0001_0001],
    );

    let out = run(&DecoderConfig::new("prior"), &task).unwrap();
    assert_eq!(out, vec![0b0000_0011, 0b0000_0011, 0b0000_0011]);
}

#[test]
fn zero_shots_produce_an_empty_output_file() {
    let dir = TempDir::new().unwrap();
    let task = task_in(dir.path(), BatchShape::new(0, 4, 1), REPETITION_DEM, &[]);

    for name in ["union_find", "prior"] {
        let out = run(&DecoderConfig::new(name), &task).unwrap();
        assert!(out.is_empty(), "{name} wrote {} bytes", out.len());
    }
}

#[test]
fn union_find_predictions_follow_input_order() {
    let dir = TempDir::new().unwrap();
    // Shots: D0 alone, D3 alone, D1+D2, nothing.
    let dets = [0b0001, 0b1000, 0b0110, 0b0000];
    let shape = BatchShape::new(dets.len(), 4, 1);
    let task = task_in(dir.path(), shape, REPETITION_DEM, &dets);

    let out = run(&DecoderConfig::new("union_find"), &task).unwrap();
    assert_eq!(out.len(), shape.output_len());
    assert_eq!(out, vec![1, 0, 0, 0]);
}

#[test]
fn detectorless_batches_predict_nothing() {
    let dir = TempDir::new().unwrap();
    let task = task_in(dir.path(), BatchShape::new(5, 0, 3), "error(0.9) L2\n", &[]);
    let out = run(&DecoderConfig::new("union_find"), &task).unwrap();
    assert_eq!(out, vec![0; 5]);
}

#[test]
fn truncated_detection_stream_is_a_format_error() {
    let dir = TempDir::new().unwrap();
    let task = task_in(dir.path(), BatchShape::new(4, 4, 1), REPETITION_DEM, &[1, 2]);

    for name in ["union_find", "prior"] {
        let err = run(&DecoderConfig::new(name), &task).unwrap_err();
        assert!(matches!(err, ProtocolError::Format(_)), "{name}: {err}");
    }
}

#[test]
fn error_model_wider_than_batch_is_a_decode_error() {
    let dir = TempDir::new().unwrap();
    let task = task_in(dir.path(), BatchShape::new(1, 2, 1), REPETITION_DEM, &[0]);
    let err = run(&DecoderConfig::new("union_find"), &task).unwrap_err();
    assert!(matches!(err, ProtocolError::Decode(_)));
}

#[test]
fn missing_scratch_directory_is_a_resource_error() {
    let dir = TempDir::new().unwrap();
    let mut task = task_in(dir.path(), BatchShape::new(1, 4, 1), REPETITION_DEM, &[0]);
    task.tmp_dir = dir.path().join("never-created");
    let err = run(&DecoderConfig::new("union_find"), &task).unwrap_err();
    assert!(matches!(err, ProtocolError::Resource { .. }));
}

#[test]
fn duplicated_instances_decode_independently() {
    let registry = DecoderRegistry::with_builtins();
    let original = registry.build(&DecoderConfig::new("union_find")).unwrap();

    let batches: Vec<Vec<u8>> = vec![
        (0..200u32).map(|i| (i % 16) as u8).collect(),
        (0..150u32).map(|i| ((i * 7) % 16) as u8).collect(),
    ];
    let dirs: Vec<TempDir> = batches.iter().map(|_| TempDir::new().unwrap()).collect();
    let tasks: Vec<DecodeTask> = batches
        .iter()
        .zip(&dirs)
        .map(|(dets, dir)| {
            task_in(dir.path(), BatchShape::new(dets.len(), 4, 1), REPETITION_DEM, dets)
        })
        .collect();

    let sequential: Vec<Vec<u8>> = tasks
        .iter()
        .map(|task| {
            original.decode_via_files(task).unwrap();
            fs::read(&task.obs_predictions_b8_out_path).unwrap()
        })
        .collect();

    let concurrent: Vec<Vec<u8>> = thread::scope(|s| {
        let handles: Vec<_> = tasks
            .iter()
            .map(|task| {
                let duplicate = registry.build(&original.config()).unwrap();
                s.spawn(move || {
                    duplicate.decode_via_files(task).unwrap();
                    fs::read(&task.obs_predictions_b8_out_path).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(sequential, concurrent);
}

#[cfg(unix)]
mod external {
    use super::*;

    fn script(dir: &Path, body: &str) -> String {
        let path = dir.join("decoder.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        path.display().to_string()
    }

    #[test]
    fn runs_program_inside_scratch_directory() {
        let dir = TempDir::new().unwrap();
        let task = task_in(dir.path(), BatchShape::new(3, 4, 1), REPETITION_DEM, &[1, 2, 3]);
        let script = script(
            dir.path(),
            "cat \"$1\" > /dev/null\nprintf '\\001\\000\\001' > \"$2\"\ntouch scratch.tmp",
        );
        let config = DecoderConfig::new("external")
            .with_param("program", "sh")
            .with_param("args", format!("{script} {{dets}} {{obs}}"));

        let out = run(&config, &task).unwrap();
        assert_eq!(out, vec![1, 0, 1]);
        assert!(task.tmp_dir.join("scratch.tmp").exists());
    }

    #[test]
    fn wrong_output_size_is_a_format_error() {
        let dir = TempDir::new().unwrap();
        let task = task_in(dir.path(), BatchShape::new(3, 4, 1), REPETITION_DEM, &[1, 2, 3]);
        let script = script(dir.path(), "printf '\\001' > \"$1\"");
        let config = DecoderConfig::new("external")
            .with_param("program", "sh")
            .with_param("args", format!("{script} {{obs}}"));

        assert!(matches!(run(&config, &task), Err(ProtocolError::Format(_))));
    }

    #[test]
    fn failing_program_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let task = task_in(dir.path(), BatchShape::new(1, 4, 1), REPETITION_DEM, &[0]);
        let script = script(dir.path(), "echo 'bad model' >&2\nexit 3");
        let config = DecoderConfig::new("external")
            .with_param("program", "sh")
            .with_param("args", script);

        match run(&config, &task) {
            Err(ProtocolError::Decode(msg)) => assert!(msg.contains("bad model"), "{msg}"),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn missing_program_is_a_resource_error() {
        let dir = TempDir::new().unwrap();
        let task = task_in(dir.path(), BatchShape::new(1, 4, 1), REPETITION_DEM, &[0]);
        let config =
            DecoderConfig::new("external").with_param("program", "/nonexistent/qdec-decoder");
        assert!(matches!(
            run(&config, &task),
            Err(ProtocolError::Resource { .. })
        ));
    }
}
