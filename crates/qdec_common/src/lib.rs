//! Common definitions shared across the decoder protocol crates.
//!
//! Provides the batch shape that every decoding invocation is described by,
//! together with the b8 size arithmetic derived from it. The shape travels
//! unchanged from the orchestrator through worker processes into decoder
//! implementations, so it lives in the one crate every other crate depends on.

use serde::{Deserialize, Serialize};

/// Number of bits packed into each byte of a b8 record.
pub const BITS_PER_BYTE: usize = 8;

/// Returns the number of bytes a b8 record of `bits` bits occupies.
///
/// Records are byte aligned, so this is `ceil(bits / 8)`. A zero-width
/// record occupies zero bytes.
#[inline(always)]
pub const fn bytes_for_bits(bits: usize) -> usize {
    bits.div_ceil(BITS_PER_BYTE)
}

/// Shape of a batch of shots handed to a decoder.
///
/// Every shot in a batch carries the same number of detection-event bits and
/// the same number of observable bits. Both widths must agree with the
/// detector error model used to configure the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BatchShape {
    /// Number of shots (independent problems) in the batch.
    pub num_shots: usize,

    /// Number of detection-event bits per shot.
    pub num_dets: usize,

    /// Number of observable-prediction bits per shot.
    pub num_obs: usize,
}

impl BatchShape {
    pub const fn new(num_shots: usize, num_dets: usize, num_obs: usize) -> Self {
        Self {
            num_shots,
            num_dets,
            num_obs,
        }
    }

    /// Bytes of one detection-event record.
    #[inline(always)]
    pub const fn det_record_bytes(&self) -> usize {
        bytes_for_bits(self.num_dets)
    }

    /// Bytes of one observable-prediction record.
    #[inline(always)]
    pub const fn obs_record_bytes(&self) -> usize {
        bytes_for_bits(self.num_obs)
    }

    /// Exact byte length of the detection-event stream for this batch.
    pub const fn input_len(&self) -> usize {
        self.num_shots * self.det_record_bytes()
    }

    /// Exact byte length of a successful prediction stream for this batch.
    pub const fn output_len(&self) -> usize {
        self.num_shots * self.obs_record_bytes()
    }

    /// Returns the same per-shot widths with a different shot count.
    ///
    /// Used when a batch is split into chunks for independent workers.
    pub const fn with_shots(&self, num_shots: usize) -> Self {
        Self {
            num_shots,
            num_dets: self.num_dets,
            num_obs: self.num_obs,
        }
    }
}
