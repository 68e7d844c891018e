//! Synthetic workloads for benchmarks and smoke tests.
//!
//! Builds a phenomenological noise model on a `size x size` grid of
//! detectors: every neighbouring pair shares an error mechanism, and every
//! node in the first and last column can also fire alone against the
//! boundary. Boundary errors on the left flip logical observable `L0`. Shots
//! are sampled with a small seeded xorshift generator so runs are repeatable.

use anyhow::{Result, ensure};
use qdec_common::BatchShape;
use qdec_core::b8;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Output paths for [`generate_phenomenological_data`].
#[derive(Debug, Clone, Copy)]
pub struct GeneratorOutput<'a> {
    pub dem: &'a Path,
    pub dets: &'a Path,
    /// Actual observable flips per shot, for scoring predictions.
    pub obs: Option<&'a Path>,
}

#[derive(Debug, Clone, Copy)]
struct GridEdge {
    u: usize,
    /// `None` for a boundary edge.
    v: Option<usize>,
    flips_l0: bool,
}

struct XorShift(u64);

impl XorShift {
    fn next_f64(&mut self) -> f64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        (x.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11) as f64 / (1u64 << 53) as f64
    }
}

fn grid_edges(size: usize) -> Vec<GridEdge> {
    let mut edges = Vec::new();
    for r in 0..size {
        edges.push(GridEdge {
            u: r * size,
            v: None,
            flips_l0: true,
        });
        for c in 0..size - 1 {
            let u = r * size + c;
            edges.push(GridEdge {
                u,
                v: Some(u + 1),
                flips_l0: false,
            });
        }
        edges.push(GridEdge {
            u: r * size + size - 1,
            v: None,
            flips_l0: false,
        });
    }
    for r in 0..size - 1 {
        for c in 0..size {
            let u = r * size + c;
            edges.push(GridEdge {
                u,
                v: Some(u + size),
                flips_l0: false,
            });
        }
    }
    edges
}

/// Writes a grid error model and `num_shots` sampled shots.
///
/// Returns the shape of the generated batch.
pub fn generate_phenomenological_data(
    out: GeneratorOutput<'_>,
    size: usize,
    num_shots: usize,
    p: f64,
    seed: u64,
) -> Result<BatchShape> {
    ensure!(size >= 2, "grid size must be at least 2, got {size}");
    ensure!((0.0..=1.0).contains(&p), "error rate {p} is not a probability");
    info!(size, p, num_shots, "generating grid model");

    let num_detectors = size * size;
    let edges = grid_edges(size);
    let mut dem = BufWriter::new(File::create(out.dem)?);
    for edge in &edges {
        write!(dem, "error({p}) D{}", edge.u)?;
        if let Some(v) = edge.v {
            write!(dem, " D{v}")?;
        }
        if edge.flips_l0 {
            write!(dem, " L0")?;
        }
        writeln!(dem)?;
    }
    dem.flush()?;

    let mut dets = BufWriter::new(File::create(out.dets)?);
    let mut obs = out.obs.map(File::create).transpose()?.map(BufWriter::new);

    let mut rng = XorShift(seed.max(1));
    let mut fired = vec![false; num_detectors];
    let mut record = Vec::with_capacity(num_detectors.div_ceil(8));
    for _ in 0..num_shots {
        fired.fill(false);
        let mut flipped = false;
        for edge in &edges {
            if rng.next_f64() < p {
                fired[edge.u] ^= true;
                if let Some(v) = edge.v {
                    fired[v] ^= true;
                }
                flipped ^= edge.flips_l0;
            }
        }
        record.clear();
        b8::encode_into(&fired, &mut record);
        dets.write_all(&record)?;
        if let Some(obs) = obs.as_mut() {
            obs.write_all(&[flipped as u8])?;
        }
    }
    dets.flush()?;
    if let Some(obs) = obs.as_mut() {
        obs.flush()?;
    }

    info!("generation done");
    Ok(BatchShape::new(num_shots, num_detectors, 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdec_io::parser::load_dem_file;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn grid_has_boundaries_on_both_sides() {
        let edges = grid_edges(3);
        // 3 rows of (2 internal + 2 boundary) plus 2 rows of 3 vertical.
        assert_eq!(edges.len(), 12 + 6);
        assert_eq!(edges.iter().filter(|e| e.flips_l0).count(), 3);
        assert!(edges.iter().filter(|e| e.flips_l0).all(|e| e.u % 3 == 0));
    }

    #[test]
    fn generated_files_agree_with_the_shape() {
        let dir = TempDir::new().unwrap();
        let dem = dir.path().join("grid.dem");
        let dets = dir.path().join("grid.b8");
        let obs = dir.path().join("grid.obs.b8");
        let shape = generate_phenomenological_data(
            GeneratorOutput {
                dem: &dem,
                dets: &dets,
                obs: Some(&obs),
            },
            4,
            50,
            0.05,
            7,
        )
        .unwrap();

        assert_eq!(shape, BatchShape::new(50, 16, 1));
        assert_eq!(fs::read(&dets).unwrap().len(), shape.input_len());
        assert_eq!(fs::read(&obs).unwrap().len(), shape.output_len());

        let model = load_dem_file(&dem).unwrap();
        assert_eq!(model.num_detectors, 16);
        assert_eq!(model.num_observables, 1);
    }

    #[test]
    fn same_seed_same_shots() {
        let dir = TempDir::new().unwrap();
        let run = |name: &str| {
            let dets = dir.path().join(name);
            let out = GeneratorOutput {
                dem: &dir.path().join("grid.dem"),
                dets: &dets,
                obs: None,
            };
            generate_phenomenological_data(out, 3, 20, 0.1, 42).unwrap();
            fs::read(&dets).unwrap()
        };
        assert_eq!(run("a.b8"), run("b.b8"));
    }
}
