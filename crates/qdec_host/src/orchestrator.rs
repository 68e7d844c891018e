//! Batch orchestration: split, dispatch, retry, reassemble.

use crate::config::OrchestratorConfig;
use crate::lifecycle::CancelToken;
use crate::worker::{ChunkOutcome, ChunkResult, ShotChunk, WorkerPool};
use anyhow::{Context, Result, bail, ensure};
use qdec_common::BatchShape;
use qdec_plugin::DecoderRegistry;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Splits `dets` into chunks of at most `shots_per_task` shots.
///
/// A batch with no shots still yields one empty chunk so the decoder gets to
/// validate the model.
pub fn split_batch(shape: BatchShape, dets: &[u8], shots_per_task: usize) -> Vec<ShotChunk> {
    let record = shape.det_record_bytes();
    let per_task = shots_per_task.max(1);
    if shape.num_shots == 0 {
        return vec![ShotChunk {
            index: 0,
            shots: 0..0,
            shape,
            dets: Vec::new(),
        }];
    }
    (0..shape.num_shots)
        .step_by(per_task)
        .enumerate()
        .map(|(index, first)| {
            let last = (first + per_task).min(shape.num_shots);
            ShotChunk {
                index,
                shots: first..last,
                shape: shape.with_shots(last - first),
                dets: dets[first * record..last * record].to_vec(),
            }
        })
        .collect()
}

/// Drives a [`WorkerPool`] over whole batches.
pub struct Orchestrator {
    config: OrchestratorConfig,
    pool: WorkerPool,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        registry: DecoderRegistry,
        worker_program: Option<PathBuf>,
    ) -> Result<Self> {
        config.validate(&registry)?;
        let pool = WorkerPool::new(&config, registry, worker_program)?;
        Ok(Self {
            config,
            pool,
            cancel: CancelToken::new(),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Token that, once cancelled, kills every running subprocess invocation
    /// and skips chunks not yet started.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Decodes a whole batch held in memory and returns its predictions.
    pub fn decode_batch(&self, dem_path: &Path, shape: BatchShape, dets: &[u8]) -> Result<Vec<u8>> {
        ensure!(
            dets.len() == shape.input_len(),
            "detection events hold {} bytes, {} shots of {} detectors need {}",
            dets.len(),
            shape.num_shots,
            shape.num_dets,
            shape.input_len()
        );
        // Workers run elsewhere, so relative paths would not survive.
        let dem_path = fs::canonicalize(dem_path)
            .with_context(|| format!("error model {}", dem_path.display()))?;

        let chunks = split_batch(shape, dets, self.config.shots_per_task);
        info!(
            shots = shape.num_shots,
            chunks = chunks.len(),
            workers = self.pool.num_workers(),
            "decoding batch"
        );
        let start = Instant::now();

        let mut results = self.pool.run(&dem_path, &chunks, &self.cancel);
        for attempt in 1..=self.config.max_retries {
            let retry: Vec<ShotChunk> = results
                .iter()
                .filter(|r| !matches!(r.outcome, ChunkOutcome::Decoded(_)))
                .map(|r| chunks[r.index].clone())
                .collect();
            if retry.is_empty() || self.cancel.is_cancelled() {
                break;
            }
            warn!(attempt, chunks = retry.len(), "retrying failed chunks");
            for result in self.pool.run(&dem_path, &retry, &self.cancel) {
                let index = result.index;
                results[index] = result;
            }
        }

        let predictions = assemble(&chunks, results, shape)?;
        info!(elapsed = ?start.elapsed(), "batch decoded");
        Ok(predictions)
    }

    /// Reads a b8 detection file, decodes it and writes the predictions.
    pub fn decode_files(
        &self,
        dem_path: &Path,
        dets_path: &Path,
        out_path: &Path,
        shape: BatchShape,
    ) -> Result<()> {
        let dets = fs::read(dets_path)
            .with_context(|| format!("reading detection events {}", dets_path.display()))?;
        let predictions = self.decode_batch(dem_path, shape, &dets)?;
        fs::write(out_path, predictions)
            .with_context(|| format!("writing predictions {}", out_path.display()))
    }
}

/// Concatenates chunk predictions in shot order, failing on the first chunk
/// that did not decode.
fn assemble(chunks: &[ShotChunk], results: Vec<ChunkResult>, shape: BatchShape) -> Result<Vec<u8>> {
    let mut predictions = Vec::with_capacity(shape.output_len());
    for (chunk, result) in chunks.iter().zip(results) {
        match result.outcome {
            ChunkOutcome::Decoded(bytes) => predictions.extend_from_slice(&bytes),
            ChunkOutcome::Failed(failure) => {
                bail!("chunk {} (shots {:?}) failed: {failure}", chunk.index, chunk.shots)
            }
            ChunkOutcome::Terminated => {
                bail!("chunk {} (shots {:?}) was terminated", chunk.index, chunk.shots)
            }
        }
    }
    ensure!(
        predictions.len() == shape.output_len(),
        "assembled {} prediction bytes, expected {}",
        predictions.len(),
        shape.output_len()
    );
    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_batch_is_one_empty_chunk() {
        let chunks = split_batch(BatchShape::new(0, 9, 1), &[], 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].shape.num_shots, 0);
        assert!(chunks[0].dets.is_empty());
    }

    #[test]
    fn last_chunk_takes_the_remainder() {
        let shape = BatchShape::new(5, 9, 1);
        let dets: Vec<u8> = (0..10).collect();
        let chunks = split_batch(shape, &dets, 2);

        let sizes: Vec<usize> = chunks.iter().map(|c| c.shape.num_shots).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(chunks[2].shots, 4..5);
        assert_eq!(chunks[2].dets, vec![8, 9]);
    }

    proptest! {
        #[test]
        fn chunks_cover_the_batch_in_order(
            num_shots in 0usize..200,
            num_dets in 0usize..20,
            per_task in 1usize..50,
        ) {
            let shape = BatchShape::new(num_shots, num_dets, 1);
            let dets: Vec<u8> = (0..shape.input_len()).map(|i| i as u8).collect();
            let chunks = split_batch(shape, &dets, per_task);

            let joined: Vec<u8> = chunks.iter().flat_map(|c| c.dets.iter().copied()).collect();
            prop_assert_eq!(joined, dets);
            prop_assert_eq!(chunks.iter().map(|c| c.shape.num_shots).sum::<usize>(), num_shots);
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index, i);
                prop_assert!(chunk.shape.num_shots <= per_task);
            }
        }
    }
}
