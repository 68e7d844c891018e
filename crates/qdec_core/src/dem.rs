//! Detector error model data types.
//!
//! A detector error model (DEM) lists independent error mechanisms. Each
//! mechanism fires with some probability and, when it fires, flips a set of
//! detectors and a set of logical observables. Mechanisms may be written as
//! a decomposition into components separated by `^`; the components are kept
//! so graph-based decoders can turn each one into its own edge.

use crate::{ProtocolError, Result};

/// Detectors and observables flipped together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Symptom {
    pub detectors: Vec<usize>,
    pub observables: Vec<usize>,
}

impl Symptom {
    /// Bitmask of the flipped observables.
    ///
    /// Fails if an observable index does not fit in 64 bits.
    pub fn observable_mask(&self) -> Result<u64> {
        self.observables.iter().try_fold(0u64, |mask, &obs| {
            if obs >= 64 {
                Err(ProtocolError::decode(format!(
                    "observable L{obs} exceeds the 64 observable limit"
                )))
            } else {
                Ok(mask ^ (1u64 << obs))
            }
        })
    }

    fn xor_in(&mut self, other: &Symptom) {
        toggle_all(&mut self.detectors, &other.detectors);
        toggle_all(&mut self.observables, &other.observables);
    }
}

fn toggle_all(target: &mut Vec<usize>, items: &[usize]) {
    for &item in items {
        match target.binary_search(&item) {
            Ok(pos) => {
                target.remove(pos);
            }
            Err(pos) => target.insert(pos, item),
        }
    }
}

/// A single independent error mechanism.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMechanism {
    pub probability: f64,

    /// Net effect of the mechanism: the XOR of all its components.
    pub symptom: Symptom,

    /// The `^`-separated components as written. A mechanism without a
    /// decomposition has exactly one component equal to its symptom.
    pub components: Vec<Symptom>,
}

impl ErrorMechanism {
    pub fn new(probability: f64, components: Vec<Symptom>) -> Self {
        let mut symptom = Symptom::default();
        for component in &components {
            symptom.xor_in(component);
        }
        Self {
            probability,
            symptom,
            components,
        }
    }
}

/// Parsed detector error model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectorErrorModel {
    /// One more than the largest detector index mentioned anywhere.
    pub num_detectors: usize,

    /// One more than the largest observable index mentioned anywhere.
    pub num_observables: usize,

    pub mechanisms: Vec<ErrorMechanism>,
}

impl DetectorErrorModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts saturate at `usize::MAX`, which no batch can carry, so
    /// [`validate_shape`](Self::validate_shape) rejects such a model.
    pub fn declare_detector(&mut self, index: usize) {
        self.num_detectors = self.num_detectors.max(index.saturating_add(1));
    }

    pub fn declare_observable(&mut self, index: usize) {
        self.num_observables = self.num_observables.max(index.saturating_add(1));
    }

    pub fn push_mechanism(&mut self, mechanism: ErrorMechanism) {
        for component in &mechanism.components {
            for &d in &component.detectors {
                self.declare_detector(d);
            }
            for &o in &component.observables {
                self.declare_observable(o);
            }
        }
        self.mechanisms.push(mechanism);
    }

    /// Checks the model against the widths declared for a batch.
    ///
    /// A model may mention fewer detectors or observables than the batch
    /// carries, but never more.
    pub fn validate_shape(&self, num_dets: usize, num_obs: usize) -> Result<()> {
        if self.num_detectors > num_dets {
            return Err(ProtocolError::decode(format!(
                "error model has {} detectors but shots carry {num_dets}",
                self.num_detectors
            )));
        }
        if self.num_observables > num_obs {
            return Err(ProtocolError::decode(format!(
                "error model has {} observables but shots carry {num_obs}",
                self.num_observables
            )));
        }
        Ok(())
    }

    /// Probability that each observable is flipped an odd number of times.
    ///
    /// Mechanisms are independent, so for observable `k` the odd-flip
    /// probability is `(1 - prod(1 - 2 p_i)) / 2` over the mechanisms that
    /// flip `k`.
    pub fn observable_flip_probabilities(&self, num_obs: usize) -> Vec<f64> {
        let mut bias = vec![1.0f64; num_obs];
        for mechanism in &self.mechanisms {
            for &obs in &mechanism.symptom.observables {
                if let Some(b) = bias.get_mut(obs) {
                    *b *= 1.0 - 2.0 * mechanism.probability;
                }
            }
        }
        bias.into_iter().map(|b| (1.0 - b) / 2.0).collect()
    }
}
