//! Core data formats and algorithms for the decoder plugin protocol.
//!
//! This crate provides the bit-packed b8 shot codec, the protocol error
//! taxonomy, the detector error model data types, and the reference
//! union-find decoder that in-process decoder plugins are built on. Nothing
//! in here touches the filesystem; file and pipe handling lives in `qdec_io`.

/// Bit-packed b8 encoding for detection events and observable predictions.
///
/// Each shot is stored as `ceil(N/8)` bytes, least-significant bit first,
/// with shots concatenated and no length metadata in the stream.
pub mod b8;

/// Bit manipulation helpers for word-packed parity storage.
pub mod bit_utils;

/// Union-find decoder producing observable predictions from syndromes.
///
/// Grows clusters around detection events until every cluster is neutral,
/// then peels the resulting spanning forest into a correction whose
/// observable mask is the prediction for the shot.
pub mod decoder;

/// Detector error model data types.
///
/// The parsed form of a `.dem` file: independent error mechanisms with a
/// probability and the detectors and observables each one flips.
pub mod dem;

/// Disjoint set union (DSU) data structure with parity tracking.
pub mod dsu;

/// Decoding graph built from a detector error model.
///
/// Nodes are detectors plus one virtual boundary node; edges are error
/// mechanisms annotated with the observables they flip.
pub mod graph;

mod error;

pub use error::{ProtocolError, Result};
