//! I/O utilities for the decoder file-exchange protocol.
//!
//! Provides functions for reading and parsing detector error models (.dem
//! files) and for streaming detection events and predictions in b8 format.
//! Every reader here works on named pipes as well as regular files: nothing
//! seeks or asks the filesystem for a size.

/// Whole-file b8 loading for benchmarks and offline tools.
///
/// Reads a complete b8 file into a bit vector and exposes it shot by shot.
/// Not suitable for decoder inputs, which may be unbounded pipes.
pub mod loader;

/// Parser for detector error model descriptions in DEM format.
pub mod parser;

/// Streaming b8 shot reader and writer.
///
/// Reads exactly the declared number of records from a file or pipe and
/// writes predictions record by record, enforcing the record sizes implied
/// by the batch shape.
pub mod stream;
