//! Throughput benchmarks.
//!
//! Two measurements over the same workload: raw union-find decoding on a
//! rayon pool (no files, no invocations), and the full file-based path
//! through the orchestrator. The gap between them is the cost of the
//! protocol.

use crate::orchestrator::Orchestrator;
use crate::stats::LatencyStats;
use anyhow::{Context, Result, ensure};
use qdec_common::BatchShape;
use qdec_core::decoder::UnionFindDecoder;
use qdec_core::graph::DecodingGraph;
use qdec_io::{loader, parser};
use rayon::prelude::*;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone)]
pub struct BenchReport {
    pub shots: usize,
    pub core_elapsed: Duration,
    pub core_failures: usize,
    pub core_latency: LatencyStats,
    pub protocol_elapsed: Duration,
    /// Shots whose prediction disagreed with the recorded observables.
    pub mispredictions: Option<usize>,
}

impl BenchReport {
    pub fn print(&self) {
        let rate = |elapsed: Duration| self.shots as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
        println!("Shots: {}", self.shots);
        println!(
            "Core:     {:.4} s, {:.2} shots/s, {} undecodable",
            self.core_elapsed.as_secs_f64(),
            rate(self.core_elapsed),
            self.core_failures
        );
        println!(
            "Protocol: {:.4} s, {:.2} shots/s",
            self.protocol_elapsed.as_secs_f64(),
            rate(self.protocol_elapsed)
        );
        if let Some(wrong) = self.mispredictions {
            println!("Logical errors: {wrong}/{}", self.shots);
        }
        println!("\nPer-shot latency (core)");
        print!("{}", self.core_latency);
    }
}

/// Benchmarks `dets_path` against `dem_path`.
///
/// `num_detectors` defaults to the model's detector count. When `obs_path`
/// holds the actual observable flips, protocol predictions are scored.
pub fn run_benchmark(
    orchestrator: &Orchestrator,
    dem_path: &Path,
    dets_path: &Path,
    obs_path: Option<&Path>,
    num_detectors: Option<usize>,
) -> Result<BenchReport> {
    let start_load = Instant::now();
    let model = parser::load_dem_file(dem_path)?;
    let graph = DecodingGraph::from_dem(&model)?;
    let num_dets = num_detectors.unwrap_or(model.num_detectors);
    let num_obs = model.num_observables;
    let shots = loader::load_b8_file(dets_path, num_dets)?;
    info!(
        nodes = graph.num_nodes(),
        edges = graph.edges.len(),
        shots = shots.num_shots(),
        elapsed = ?start_load.elapsed(),
        "workload loaded"
    );

    let start_core = Instant::now();
    let (core_latency, core_failures) = (0..shots.num_shots())
        .into_par_iter()
        .map_init(UnionFindDecoder::new, |decoder, i| {
            let syndrome = shots.fired(i);
            let start = Instant::now();
            let ok = decoder.decode(&graph, &syndrome).is_ok();
            (start.elapsed(), !ok as usize)
        })
        .fold(
            || (LatencyStats::new(Duration::from_micros(10)), 0usize),
            |(mut stats, failures), (elapsed, failed)| {
                stats.record(elapsed);
                (stats, failures + failed)
            },
        )
        .reduce(
            || (LatencyStats::new(Duration::from_micros(10)), 0usize),
            |(a, fa), (b, fb)| (a.merge(b), fa + fb),
        );
    let core_elapsed = start_core.elapsed();

    let shape = BatchShape::new(shots.num_shots(), num_dets, num_obs);
    let start_protocol = Instant::now();
    let predictions = orchestrator.decode_batch(dem_path, shape, shots.as_bytes())?;
    let protocol_elapsed = start_protocol.elapsed();

    let mispredictions = obs_path
        .map(|path| -> Result<usize> {
            let actual = fs::read(path)
                .with_context(|| format!("reading observables {}", path.display()))?;
            ensure!(
                actual.len() == predictions.len(),
                "observable file holds {} bytes, predictions {}",
                actual.len(),
                predictions.len()
            );
            let record = shape.obs_record_bytes().max(1);
            Ok(actual
                .chunks(record)
                .zip(predictions.chunks(record))
                .filter(|(a, p)| a != p)
                .count())
        })
        .transpose()?;

    Ok(BenchReport {
        shots: shots.num_shots(),
        core_elapsed,
        core_failures,
        core_latency,
        protocol_elapsed,
        mispredictions,
    })
}
