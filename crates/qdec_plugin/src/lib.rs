//! Decoder plugin contract.
//!
//! A decoder is anything that can turn a file of detection events into a file
//! of observable predictions, given a detector error model and a scratch
//! directory it does not own. Everything crosses the boundary as files, so
//! out-of-process decoders plug in the same way in-process ones do.
//!
//! Decoder instances are rebuilt in every worker from their
//! [`DecoderConfig`], a small serializable value. Instances hold nothing but
//! that configuration; all per-invocation state lives inside
//! [`Decoder::decode_via_files`].

use qdec_common::BatchShape;
use qdec_core::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Reference decoder implementations.
pub mod decoders;

/// Name-to-constructor registry used to rebuild decoders from configs.
pub mod registry;

pub use registry::DecoderRegistry;

/// One decoding problem, described entirely by paths and counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeTask {
    /// Shot count and per-shot bit widths.
    pub shape: BatchShape,

    /// Detector error model used to configure the decoder.
    pub dem_path: PathBuf,

    /// Detection events in b8 format. May be a named pipe.
    pub dets_b8_in_path: PathBuf,

    /// Destination for the b8 predictions.
    pub obs_predictions_b8_out_path: PathBuf,

    /// Scratch directory owned by the caller. Every temporary artifact the
    /// decoder creates must go here; the caller deletes it afterwards,
    /// possibly while the decoder is being killed.
    pub tmp_dir: PathBuf,
}

impl DecodeTask {
    /// Checks the parts of the task a decoder relies on before touching data.
    pub fn check(&self) -> Result<()> {
        if !self.tmp_dir.is_dir() {
            return Err(ProtocolError::resource(
                &self.tmp_dir,
                "scratch directory does not exist",
            ));
        }
        if !self.dem_path.exists() {
            return Err(ProtocolError::resource(
                &self.dem_path,
                "error model not found",
            ));
        }
        Ok(())
    }
}

/// The capability every decoder implements.
///
/// Implementations must:
/// - read exactly `shape.num_shots` records from `dets_b8_in_path` without
///   seeking or asking for its size,
/// - write exactly `shape.num_shots` records of `ceil(num_obs / 8)` bytes to
///   `obs_predictions_b8_out_path`, in input order,
/// - create temporary files only under `tmp_dir` and never delete `tmp_dir`.
///
/// Errors propagate to the caller, which discards the output file. The
/// caller may also kill the decoder at any moment without notice.
pub trait Decoder: Send + Sync + fmt::Debug {
    /// The configuration this instance was built from.
    ///
    /// Passing it to [`DecoderRegistry::build`] yields an independent
    /// duplicate, which is how instances move into worker processes.
    fn config(&self) -> DecoderConfig;

    fn decode_via_files(&self, task: &DecodeTask) -> Result<()>;
}

/// Serializable description of a configured decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Registry name of the decoder.
    pub name: String,

    /// Decoder-specific settings.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl DecoderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Parses an optional parameter, failing on a value of the wrong type.
    pub fn parse_param<T: FromStr>(&self, key: &str) -> Result<Option<T>>
    where
        T::Err: fmt::Display,
    {
        self.param(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| {
                    ProtocolError::decode(format!(
                        "decoder `{}` parameter `{key}`={raw:?}: {e}",
                        self.name
                    ))
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_params_parse_or_fail() {
        let config = DecoderConfig::new("prior")
            .with_param("threshold", "0.25")
            .with_param("bogus", "x");
        assert_eq!(config.parse_param::<f64>("threshold").unwrap(), Some(0.25));
        assert_eq!(config.parse_param::<f64>("missing").unwrap(), None);
        assert!(config.parse_param::<f64>("bogus").is_err());
    }

    #[test]
    fn task_check_requires_scratch_and_model() {
        let dir = tempfile::tempdir().unwrap();
        let dem = dir.path().join("model.dem");
        std::fs::write(&dem, "error(0.1) D0\n").unwrap();

        let mut task = DecodeTask {
            shape: BatchShape::new(0, 1, 0),
            dem_path: dem,
            dets_b8_in_path: dir.path().join("dets.b8"),
            obs_predictions_b8_out_path: dir.path().join("obs.b8"),
            tmp_dir: dir.path().to_path_buf(),
        };
        assert!(task.check().is_ok());

        task.tmp_dir = dir.path().join("gone");
        assert!(matches!(task.check(), Err(ProtocolError::Resource { .. })));
    }
}
