use crate::{DecodeTask, Decoder, DecoderConfig};
use qdec_core::{ProtocolError, Result};
use qdec_io::stream::{ShotReader, write_zero_predictions};
use std::fs;
use std::io::ErrorKind;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Adapter for decoders that run as separate programs.
///
/// The program is started once per invocation with its arguments rendered
/// from templates: `{dem}`, `{dets}`, `{obs}`, `{tmp}`, `{num_shots}`,
/// `{num_dets}` and `{num_obs}` are replaced by the task's values. It runs
/// with `tmp_dir` as its working directory and as `TMPDIR`, so well-behaved
/// tools keep their scratch files where the caller can reclaim them.
///
/// Parameters: `program` (required) and `args` (whitespace separated
/// templates, optional).
#[derive(Debug, Clone)]
pub struct ExternalCommandDecoder {
    config: DecoderConfig,
    program: String,
    args: Vec<String>,
}

impl ExternalCommandDecoder {
    pub const NAME: &'static str = "external";

    pub fn new(config: &DecoderConfig) -> Result<Self> {
        let program = config
            .param("program")
            .ok_or_else(|| ProtocolError::decode("external decoder needs a `program` parameter"))?
            .to_string();
        let args = config
            .param("args")
            .unwrap_or("")
            .split_whitespace()
            .map(str::to_string)
            .collect();
        Ok(Self {
            config: config.clone(),
            program,
            args,
        })
    }

    pub fn from_config(config: &DecoderConfig) -> Result<Box<dyn Decoder>> {
        Ok(Box::new(Self::new(config)?))
    }

    fn render_args(&self, task: &DecodeTask) -> Vec<String> {
        let shape = &task.shape;
        let substitutions = [
            ("{dem}", task.dem_path.display().to_string()),
            ("{dets}", task.dets_b8_in_path.display().to_string()),
            ("{obs}", task.obs_predictions_b8_out_path.display().to_string()),
            ("{tmp}", task.tmp_dir.display().to_string()),
            ("{num_shots}", shape.num_shots.to_string()),
            ("{num_dets}", shape.num_dets.to_string()),
            ("{num_obs}", shape.num_obs.to_string()),
        ];
        self.args
            .iter()
            .map(|template| {
                substitutions
                    .iter()
                    .fold(template.clone(), |arg, (key, value)| arg.replace(key, value))
            })
            .collect()
    }
}

impl Decoder for ExternalCommandDecoder {
    fn config(&self) -> DecoderConfig {
        self.config.clone()
    }

    fn decode_via_files(&self, task: &DecodeTask) -> Result<()> {
        task.check()?;
        let shape = &task.shape;

        if shape.num_dets == 0 {
            let mut reader = ShotReader::open(&task.dets_b8_in_path, shape)?;
            while reader.next_record()?.is_some() {}
            reader.finish()?;
            return write_zero_predictions(&task.obs_predictions_b8_out_path, shape);
        }

        let args = self.render_args(task);
        debug!(program = %self.program, ?args, "starting external decoder");

        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(&task.tmp_dir)
            .env("TMPDIR", &task.tmp_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    ProtocolError::resource(&self.program, e)
                }
                _ => ProtocolError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(program = %self.program, status = %output.status, "external decoder failed");
            return Err(ProtocolError::decode(format!(
                "`{}` exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        // Only regular files have a meaningful length; a pipe reports zero.
        let meta = fs::metadata(&task.obs_predictions_b8_out_path)
            .map_err(|e| ProtocolError::resource(&task.obs_predictions_b8_out_path, e))?;
        if meta.is_file() && meta.len() != shape.output_len() as u64 {
            return Err(ProtocolError::format(format!(
                "`{}` wrote {} prediction bytes, expected {}",
                self.program,
                meta.len(),
                shape.output_len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdec_common::BatchShape;
    use std::path::PathBuf;

    #[test]
    fn renders_placeholders_inside_arguments() {
        let config = DecoderConfig::new("external")
            .with_param("program", "my-decoder")
            .with_param("args", "--in={dets} --out {obs} -n {num_shots}x{num_obs}");
        let decoder = ExternalCommandDecoder::new(&config).unwrap();
        let task = DecodeTask {
            shape: BatchShape::new(7, 3, 2),
            dem_path: PathBuf::from("/w/m.dem"),
            dets_b8_in_path: PathBuf::from("/w/d.b8"),
            obs_predictions_b8_out_path: PathBuf::from("/w/o.b8"),
            tmp_dir: PathBuf::from("/w/tmp"),
        };

        assert_eq!(
            decoder.render_args(&task),
            vec!["--in=/w/d.b8", "--out", "/w/o.b8", "-n", "7x2"]
        );
    }

    #[test]
    fn program_parameter_is_required() {
        let err = ExternalCommandDecoder::new(&DecoderConfig::new("external")).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }
}
