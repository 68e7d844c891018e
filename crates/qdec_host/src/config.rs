//! Orchestrator settings, loaded from TOML.
//!
//! ```toml
//! workers = 8
//! shots_per_task = 10000
//! execution = "subprocess"
//! input = "pipe"
//! timeout_secs = 30.0
//! max_retries = 1
//! scratch_root = "/scratch/qdec"
//!
//! [decoder]
//! name = "union_find"
//! ```
//!
//! Every key is optional; missing keys take the values of
//! [`OrchestratorConfig::default`].

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use qdec_plugin::{DecoderConfig, DecoderRegistry};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where a decoder invocation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// On a pool thread. Cannot be killed.
    #[default]
    InProcess,
    /// In a re-executed `qdec worker` process, killable at any time.
    Subprocess,
}

/// How detection events reach the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// A regular file written before the invocation starts.
    #[default]
    File,
    /// A named pipe fed while the decoder reads.
    Pipe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub workers: usize,
    pub shots_per_task: usize,
    pub execution: ExecutionMode,
    pub input: InputMode,
    /// Per-invocation limit. Needs subprocess execution.
    pub timeout_secs: Option<f64>,
    /// Extra attempts for a failed or killed chunk.
    pub max_retries: u32,
    /// Parent for invocation scratch directories; the system temp dir if unset.
    pub scratch_root: Option<PathBuf>,
    pub decoder: DecoderConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: rayon::current_num_threads(),
            shots_per_task: 10_000,
            execution: ExecutionMode::InProcess,
            input: InputMode::File,
            timeout_secs: None,
            max_retries: 0,
            scratch_root: None,
            decoder: DecoderConfig::new("union_find"),
        }
    }
}

impl OrchestratorConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs_f64)
    }

    /// Rejects settings the orchestrator cannot honour.
    pub fn validate(&self, registry: &DecoderRegistry) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.shots_per_task == 0 {
            bail!("shots_per_task must be at least 1");
        }
        if let Some(secs) = self.timeout_secs {
            if !(secs.is_finite() && secs > 0.0) {
                bail!("timeout_secs must be a positive number, got {secs}");
            }
            if self.execution == ExecutionMode::InProcess {
                bail!("timeout_secs needs execution = \"subprocess\"; in-process decoders cannot be killed");
            }
        }
        if !registry.contains(&self.decoder.name) {
            bail!(
                "unknown decoder `{}` (known: {})",
                self.decoder.name,
                registry.names().collect::<Vec<_>>().join(", ")
            );
        }
        if cfg!(not(unix)) && self.input == InputMode::Pipe {
            bail!("pipe input is only available on unix");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = OrchestratorConfig::from_toml("").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.decoder.name, "union_find");
    }

    #[test]
    fn parses_every_key() {
        let config = OrchestratorConfig::from_toml(
            r#"
            workers = 3
            shots_per_task = 250
            execution = "subprocess"
            input = "pipe"
            timeout_secs = 1.5
            max_retries = 2
            scratch_root = "/tmp/qdec"

            [decoder]
            name = "prior"
            params = { threshold = "0.3" }
            "#,
        )
        .unwrap();

        assert_eq!(config.workers, 3);
        assert_eq!(config.shots_per_task, 250);
        assert_eq!(config.execution, ExecutionMode::Subprocess);
        assert_eq!(config.input, InputMode::Pipe);
        assert_eq!(config.timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.scratch_root, Some(PathBuf::from("/tmp/qdec")));
        assert_eq!(config.decoder.param("threshold"), Some("0.3"));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(OrchestratorConfig::from_toml("execution = \"remote\"").is_err());
    }

    #[test]
    fn validation_catches_unusable_settings() {
        let registry = DecoderRegistry::with_builtins();
        assert!(OrchestratorConfig::default().validate(&registry).is_ok());

        let config = OrchestratorConfig {
            timeout_secs: Some(1.0),
            ..OrchestratorConfig::default()
        };
        assert!(config.validate(&registry).is_err());

        let config = OrchestratorConfig {
            shots_per_task: 0,
            ..OrchestratorConfig::default()
        };
        assert!(config.validate(&registry).is_err());

        let config = OrchestratorConfig {
            decoder: DecoderConfig::new("tensor_network"),
            ..OrchestratorConfig::default()
        };
        assert!(config.validate(&registry).is_err());
    }
}
