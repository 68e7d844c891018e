//! Worker pool: runs independent decoding invocations in parallel.
//!
//! Each chunk of shots gets its own scope, its own decoder instance rebuilt
//! from the decoder config, and its own result slot. Chunks share nothing,
//! so one failing or being killed has no effect on the others. Results come
//! back in chunk order no matter which finished first.

use crate::config::{ExecutionMode, InputMode, OrchestratorConfig};
use crate::lifecycle::{
    CancelToken, Failure, FailureKind, Invocation, InvocationOutcome, REPORT_FILE, WorkerReport,
};
use anyhow::{Context, Result};
use qdec_common::BatchShape;
use qdec_core::ProtocolError;
use qdec_plugin::{DecodeTask, DecoderConfig, DecoderRegistry};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Everything a worker process needs, serialized into its scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerJob {
    pub decoder: DecoderConfig,
    pub task: DecodeTask,
}

/// Entry point of `qdec worker`: runs one job and records the result.
///
/// Returns whether decoding succeeded. The report lands next to the job file.
pub fn run_worker_job(job_path: &Path, registry: &DecoderRegistry) -> Result<bool> {
    let text = fs::read_to_string(job_path)
        .with_context(|| format!("reading job {}", job_path.display()))?;
    let job: WorkerJob = serde_json::from_str(&text)
        .with_context(|| format!("parsing job {}", job_path.display()))?;

    let result = registry
        .build(&job.decoder)
        .and_then(|decoder| decoder.decode_via_files(&job.task));
    let report = WorkerReport {
        failure: result.as_ref().err().map(Failure::from),
    };
    if let Err(e) = &result {
        warn!(decoder = %job.decoder.name, "decoding failed: {e}");
    }

    let report_path = job_path.with_file_name(REPORT_FILE);
    fs::write(&report_path, serde_json::to_vec(&report)?)
        .with_context(|| format!("writing report {}", report_path.display()))?;
    Ok(result.is_ok())
}

/// A contiguous run of shots, already in b8 form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShotChunk {
    pub index: usize,
    /// Shot indices this chunk covers within the whole batch.
    pub shots: Range<usize>,
    pub shape: BatchShape,
    pub dets: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Predictions for every shot of the chunk.
    Decoded(Vec<u8>),
    Failed(Failure),
    Terminated,
}

#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub index: usize,
    pub outcome: ChunkOutcome,
    pub elapsed: Duration,
}

/// How invocations are started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    InProcess,
    Subprocess { program: PathBuf },
}

pub struct WorkerPool {
    threads: rayon::ThreadPool,
    registry: DecoderRegistry,
    decoder: DecoderConfig,
    execution: Execution,
    input: InputMode,
    timeout: Option<Duration>,
    scratch_root: Option<PathBuf>,
}

impl WorkerPool {
    /// Builds a pool from orchestrator settings.
    ///
    /// Subprocess execution re-runs `worker_program`, defaulting to the
    /// current executable.
    pub fn new(
        config: &OrchestratorConfig,
        registry: DecoderRegistry,
        worker_program: Option<PathBuf>,
    ) -> Result<Self> {
        let execution = match config.execution {
            ExecutionMode::InProcess => Execution::InProcess,
            ExecutionMode::Subprocess => Execution::Subprocess {
                program: match worker_program {
                    Some(program) => program,
                    None => std::env::current_exe().context("locating worker executable")?,
                },
            },
        };
        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("qdec-worker-{i}"))
            .build()
            .context("starting worker threads")?;
        info!(
            workers = config.workers,
            decoder = %config.decoder.name,
            ?execution,
            input = ?config.input,
            "worker pool ready"
        );
        Ok(Self {
            threads,
            registry,
            decoder: config.decoder.clone(),
            execution,
            input: config.input,
            timeout: config.timeout(),
            scratch_root: config.scratch_root.clone(),
        })
    }

    pub fn num_workers(&self) -> usize {
        self.threads.current_num_threads()
    }

    /// Decodes every chunk against the model at `dem_path`.
    ///
    /// The returned vector is indexed like `chunks`.
    pub fn run(
        &self,
        dem_path: &Path,
        chunks: &[ShotChunk],
        cancel: &CancelToken,
    ) -> Vec<ChunkResult> {
        self.threads.install(|| {
            chunks
                .par_iter()
                .map(|chunk| self.run_chunk(dem_path, chunk, cancel))
                .collect()
        })
    }

    fn run_chunk(&self, dem_path: &Path, chunk: &ShotChunk, cancel: &CancelToken) -> ChunkResult {
        let start = Instant::now();
        let outcome = self
            .invoke(dem_path, chunk, cancel)
            .unwrap_or_else(|e| ChunkOutcome::Failed(Failure::from(&e)));
        let elapsed = start.elapsed();
        match &outcome {
            ChunkOutcome::Decoded(_) => {
                debug!(chunk = chunk.index, shots = ?chunk.shots, ?elapsed, "chunk decoded")
            }
            ChunkOutcome::Failed(failure) => {
                warn!(chunk = chunk.index, shots = ?chunk.shots, "chunk failed: {failure}")
            }
            ChunkOutcome::Terminated => {
                warn!(chunk = chunk.index, shots = ?chunk.shots, ?elapsed, "chunk terminated")
            }
        }
        ChunkResult {
            index: chunk.index,
            outcome,
            elapsed,
        }
    }

    fn invoke(
        &self,
        dem_path: &Path,
        chunk: &ShotChunk,
        cancel: &CancelToken,
    ) -> qdec_core::Result<ChunkOutcome> {
        let mut invocation = Invocation::create(self.scratch_root.as_deref())?;
        let task = DecodeTask {
            shape: chunk.shape,
            dem_path: dem_path.to_path_buf(),
            dets_b8_in_path: invocation.root().join("dets.b8"),
            obs_predictions_b8_out_path: invocation.root().join("obs.b8"),
            tmp_dir: invocation.tmp_dir().to_path_buf(),
        };

        if cancel.is_cancelled() {
            invocation.reclaim()?;
            return Ok(ChunkOutcome::Terminated);
        }

        // Declared after the invocation so it is released before the scope
        // is deleted on every exit path.
        let feeder = self.stage_input(&task.dets_b8_in_path, &chunk.dets)?;

        let outcome = match &self.execution {
            Execution::InProcess => {
                let decoder = self.registry.build(&self.decoder)?;
                invocation.run_in_process(decoder.as_ref(), &task)?
            }
            Execution::Subprocess { program } => {
                let job = WorkerJob {
                    decoder: self.decoder.clone(),
                    task: task.clone(),
                };
                let json = serde_json::to_string(&job)
                    .map_err(|e| ProtocolError::resource(invocation.root(), e))?;
                invocation.spawn_worker(program, &json)?;
                invocation.wait_timeout(self.timeout, cancel)?
            }
        };

        #[cfg(unix)]
        if let Some(feeder) = feeder {
            if let Err(e) = feeder.finish() {
                debug!(chunk = chunk.index, "pipe writer ended with {e}");
            }
        }
        #[cfg(not(unix))]
        let () = feeder;

        let result = match outcome {
            InvocationOutcome::Succeeded => {
                let path = &task.obs_predictions_b8_out_path;
                let bytes = fs::read(path).map_err(|e| ProtocolError::resource(path, e))?;
                if bytes.len() == chunk.shape.output_len() {
                    ChunkOutcome::Decoded(bytes)
                } else {
                    ChunkOutcome::Failed(Failure {
                        kind: FailureKind::Format,
                        message: format!(
                            "decoder wrote {} prediction bytes, expected {}",
                            bytes.len(),
                            chunk.shape.output_len()
                        ),
                    })
                }
            }
            InvocationOutcome::Failed(failure) => ChunkOutcome::Failed(failure),
            InvocationOutcome::Terminated => ChunkOutcome::Terminated,
        };
        invocation.reclaim()?;
        Ok(result)
    }

    #[cfg(unix)]
    fn stage_input(
        &self,
        path: &Path,
        dets: &[u8],
    ) -> qdec_core::Result<Option<crate::pipe::PipeFeeder>> {
        match self.input {
            InputMode::File => {
                fs::write(path, dets).map_err(|e| ProtocolError::resource(path, e))?;
                Ok(None)
            }
            InputMode::Pipe => crate::pipe::PipeFeeder::start(path, dets.to_vec()).map(Some),
        }
    }

    #[cfg(not(unix))]
    fn stage_input(&self, path: &Path, dets: &[u8]) -> qdec_core::Result<()> {
        fs::write(path, dets).map_err(|e| ProtocolError::resource(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdec_plugin::Decoder;
    use tempfile::TempDir;

    #[test]
    fn worker_job_writes_a_report() {
        let dir = TempDir::new().unwrap();
        let scratch = dir.path().join("scratch");
        fs::create_dir(&scratch).unwrap();
        let dem = dir.path().join("model.dem");
        fs::write(&dem, "error(1) L0\ndetector D0\n").unwrap();
        let dets = dir.path().join("dets.b8");
        fs::write(&dets, [0, 1]).unwrap();

        let job = WorkerJob {
            decoder: DecoderConfig::new("prior"),
            task: DecodeTask {
                shape: BatchShape::new(2, 1, 1),
                dem_path: dem,
                dets_b8_in_path: dets,
                obs_predictions_b8_out_path: dir.path().join("obs.b8"),
                tmp_dir: scratch,
            },
        };
        let job_path = dir.path().join("job.json");
        fs::write(&job_path, serde_json::to_string(&job).unwrap()).unwrap();

        let registry = DecoderRegistry::with_builtins();
        assert!(run_worker_job(&job_path, &registry).unwrap());
        assert_eq!(fs::read(dir.path().join("obs.b8")).unwrap(), vec![1, 1]);

        let report: WorkerReport =
            serde_json::from_slice(&fs::read(dir.path().join(REPORT_FILE)).unwrap()).unwrap();
        assert_eq!(report.failure, None);
    }

    #[test]
    fn failed_job_reports_its_category() {
        let dir = TempDir::new().unwrap();
        let job = WorkerJob {
            decoder: DecoderConfig::new("prior"),
            task: DecodeTask {
                shape: BatchShape::new(1, 1, 1),
                dem_path: dir.path().join("model.dem"),
                dets_b8_in_path: dir.path().join("dets.b8"),
                obs_predictions_b8_out_path: dir.path().join("obs.b8"),
                tmp_dir: dir.path().join("missing"),
            },
        };
        let job_path = dir.path().join("job.json");
        fs::write(&job_path, serde_json::to_string(&job).unwrap()).unwrap();

        assert!(!run_worker_job(&job_path, &DecoderRegistry::with_builtins()).unwrap());
        let report: WorkerReport =
            serde_json::from_slice(&fs::read(dir.path().join(REPORT_FILE)).unwrap()).unwrap();
        assert_eq!(report.failure.map(|f| f.kind), Some(FailureKind::Resource));
    }

    #[test]
    fn pool_builds_a_fresh_decoder_per_chunk() {
        let config = OrchestratorConfig {
            workers: 2,
            ..OrchestratorConfig::default()
        };
        let pool = WorkerPool::new(&config, DecoderRegistry::with_builtins(), None).unwrap();
        assert_eq!(pool.num_workers(), 2);
        assert_eq!(pool.execution, Execution::InProcess);

        let decoder = pool.registry.build(&pool.decoder).unwrap();
        assert_eq!(decoder.config(), config.decoder);
    }
}
