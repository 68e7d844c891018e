use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use qdec_common::{BatchShape, bytes_for_bits};
use qdec_host::bench;
use qdec_host::generator::{self, GeneratorOutput};
use qdec_host::{ExecutionMode, InputMode, Orchestrator, OrchestratorConfig, run_worker_job};
use qdec_io::parser;
use qdec_plugin::DecoderRegistry;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qdec", about = "File-based decoding of quantum error correction shots")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by every command that runs the orchestrator.
#[derive(clap::Args)]
struct RunArgs {
    /// TOML file with orchestrator settings; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long)]
    shots_per_task: Option<usize>,
    #[arg(long, value_enum)]
    execution: Option<ExecutionMode>,
    #[arg(long, value_enum)]
    input: Option<InputMode>,
    /// Per-invocation timeout in seconds (subprocess execution only).
    #[arg(long)]
    timeout: Option<f64>,
    #[arg(long)]
    retries: Option<u32>,
    #[arg(long)]
    decoder: Option<String>,
    /// Decoder parameter as KEY=VALUE. Repeatable.
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
    #[arg(long)]
    scratch_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a b8 detection-event file into a b8 prediction file.
    Decode {
        #[arg(short, long)]
        dem: PathBuf,
        #[arg(short = 'i', long)]
        dets: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
        /// Defaults to the error model's detector count.
        #[arg(long)]
        num_dets: Option<usize>,
        /// Defaults to the error model's observable count.
        #[arg(long)]
        num_obs: Option<usize>,
        /// Defaults to the detection file length over the record size.
        #[arg(long)]
        num_shots: Option<usize>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Run a single job inside a subprocess. Started by the orchestrator.
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        job: PathBuf,
    },
    /// Generate a grid error model with sampled shots.
    Gen {
        #[arg(long, default_value = "bench.dem")]
        dem: PathBuf,
        #[arg(long, default_value = "bench.b8")]
        b8: PathBuf,
        /// Also write the actual observable flips here.
        #[arg(long)]
        obs: Option<PathBuf>,
        #[arg(long, default_value_t = 21)]
        size: usize,
        #[arg(long, default_value_t = 100_000)]
        shots: usize,
        #[arg(long, default_value_t = 0.005)]
        p: f64,
        #[arg(long, default_value_t = 12345)]
        seed: u64,
    },
    /// Measure core and protocol throughput on a workload.
    Bench {
        #[arg(short, long)]
        dem: PathBuf,
        #[arg(short, long)]
        b8: PathBuf,
        /// Actual observable flips, to count logical errors.
        #[arg(long)]
        obs: Option<PathBuf>,
        #[arg(long)]
        detectors: Option<usize>,
        #[command(flatten)]
        run: RunArgs,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))
}

impl RunArgs {
    fn into_config(self) -> Result<OrchestratorConfig> {
        let mut config = match &self.config {
            Some(path) => OrchestratorConfig::load(path)?,
            None => OrchestratorConfig::default(),
        };
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(n) = self.shots_per_task {
            config.shots_per_task = n;
        }
        if let Some(execution) = self.execution {
            config.execution = execution;
        }
        if let Some(input) = self.input {
            config.input = input;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = Some(timeout);
        }
        if let Some(retries) = self.retries {
            config.max_retries = retries;
        }
        if let Some(name) = self.decoder {
            config.decoder.name = name;
            config.decoder.params.clear();
        }
        config.decoder.params.extend(self.params);
        if self.scratch_root.is_some() {
            config.scratch_root = self.scratch_root;
        }
        Ok(config)
    }

    fn orchestrator(self) -> Result<Orchestrator> {
        Orchestrator::new(self.into_config()?, DecoderRegistry::with_builtins(), None)
    }
}

fn batch_shape(
    dem: &Path,
    dets: &Path,
    num_dets: Option<usize>,
    num_obs: Option<usize>,
    num_shots: Option<usize>,
) -> Result<BatchShape> {
    let model = parser::load_dem_file(dem)?;
    let num_dets = num_dets.unwrap_or(model.num_detectors);
    let num_obs = num_obs.unwrap_or(model.num_observables);
    let num_shots = match num_shots {
        Some(n) => n,
        None => {
            let record = bytes_for_bits(num_dets);
            if record == 0 {
                bail!("--num-shots is required when shots carry no detectors");
            }
            let metadata = std::fs::metadata(dets)
                .with_context(|| format!("reading {}", dets.display()))?;
            if !metadata.is_file() {
                bail!(
                    "--num-shots is required when {} is not a regular file",
                    dets.display()
                );
            }
            let len = metadata.len() as usize;
            if len % record != 0 {
                bail!("{} is not a whole number of {record}-byte records", dets.display());
            }
            len / record
        }
    };
    Ok(BatchShape::new(num_shots, num_dets, num_obs))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Decode {
            dem,
            dets,
            out,
            num_dets,
            num_obs,
            num_shots,
            run,
        } => {
            let shape = batch_shape(&dem, &dets, num_dets, num_obs, num_shots)?;
            let orchestrator = run.orchestrator()?;
            orchestrator.decode_files(&dem, &dets, &out, shape)?;
        }
        Commands::Worker { job } => {
            if !run_worker_job(&job, &DecoderRegistry::with_builtins())? {
                std::process::exit(1);
            }
        }
        Commands::Gen {
            dem,
            b8,
            obs,
            size,
            shots,
            p,
            seed,
        } => {
            let out = GeneratorOutput {
                dem: &dem,
                dets: &b8,
                obs: obs.as_deref(),
            };
            generator::generate_phenomenological_data(out, size, shots, p, seed)?;
        }
        Commands::Bench {
            dem,
            b8,
            obs,
            detectors,
            run,
        } => {
            let orchestrator = run.orchestrator()?;
            let report =
                bench::run_benchmark(&orchestrator, &dem, &b8, obs.as_deref(), detectors)?;
            report.print();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn model(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("model.dem");
        fs::write(&path, "error(0.1) D0 D9 L0\n").unwrap();
        path
    }

    #[test]
    fn shot_count_comes_from_the_file_length() {
        let dir = TempDir::new().unwrap();
        let dets = dir.path().join("dets.b8");
        fs::write(&dets, [0; 6]).unwrap();

        let shape = batch_shape(&model(&dir), &dets, None, None, None).unwrap();
        assert_eq!(shape, BatchShape::new(3, 10, 1));
        assert!(batch_shape(&model(&dir), &dets, Some(40), None, None).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn pipes_need_an_explicit_shot_count() {
        use nix::sys::stat::Mode;

        let dir = TempDir::new().unwrap();
        let dets = dir.path().join("dets.fifo");
        nix::unistd::mkfifo(&dets, Mode::S_IRUSR | Mode::S_IWUSR).unwrap();

        let err = batch_shape(&model(&dir), &dets, None, None, None).unwrap_err();
        assert!(err.to_string().contains("--num-shots"), "{err}");

        let shape = batch_shape(&model(&dir), &dets, None, None, Some(4)).unwrap();
        assert_eq!(shape.num_shots, 4);
    }
}
