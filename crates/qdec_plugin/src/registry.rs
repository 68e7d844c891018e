use crate::decoders::{ExternalCommandDecoder, PriorDecoder, UnionFindFileDecoder};
use crate::{Decoder, DecoderConfig};
use qdec_core::{ProtocolError, Result};
use std::collections::BTreeMap;

/// Builds a decoder from its configuration.
pub type Constructor = fn(&DecoderConfig) -> Result<Box<dyn Decoder>>;

/// Maps decoder names to constructors.
///
/// The orchestrator looks decoders up here by the name in their config, and
/// every worker rebuilds its own instance through the same table.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the reference decoders.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(UnionFindFileDecoder::NAME, UnionFindFileDecoder::from_config);
        registry.register(PriorDecoder::NAME, PriorDecoder::from_config);
        registry.register(ExternalCommandDecoder::NAME, ExternalCommandDecoder::from_config);
        registry
    }

    /// Registers `constructor` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, constructor: Constructor) {
        self.constructors.insert(name.into(), constructor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Constructs a fresh decoder instance from `config`.
    pub fn build(&self, config: &DecoderConfig) -> Result<Box<dyn Decoder>> {
        let constructor = self.constructors.get(&config.name).ok_or_else(|| {
            ProtocolError::resource(
                config.name.as_str(),
                format!(
                    "no decoder registered under this name (known: {})",
                    self.names().collect::<Vec<_>>().join(", ")
                ),
            )
        })?;
        constructor(config)
    }
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered_by_name() {
        let registry = DecoderRegistry::with_builtins();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["external", "prior", "union_find"]);
    }

    #[test]
    fn built_instances_report_their_config() {
        let registry = DecoderRegistry::with_builtins();
        let config = DecoderConfig::new("prior").with_param("threshold", "0.75");
        let decoder = registry.build(&config).unwrap();
        assert_eq!(decoder.config(), config);
    }

    #[test]
    fn unknown_names_are_resource_errors() {
        let registry = DecoderRegistry::with_builtins();
        let err = registry.build(&DecoderConfig::new("pymatching")).unwrap_err();
        assert!(matches!(err, ProtocolError::Resource { .. }));
    }
}
