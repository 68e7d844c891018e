use anyhow::{Context, Result, ensure};
use bitvec::prelude::*;
use qdec_common::bytes_for_bits;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Detection events of a whole b8 file, addressable by shot.
pub struct ShotTable {
    bits: BitVec<u8, Lsb0>,
    bits_per_shot: usize,
    num_shots: usize,
}

impl ShotTable {
    pub fn num_shots(&self) -> usize {
        self.num_shots
    }

    pub fn bits_per_shot(&self) -> usize {
        self.bits_per_shot
    }

    /// The raw b8 bytes, exactly as they appeared on disk.
    pub fn as_bytes(&self) -> &[u8] {
        self.bits.as_raw_slice()
    }

    /// The live bits of shot `i`, without the record's padding bits.
    pub fn shot(&self, i: usize) -> &BitSlice<u8, Lsb0> {
        let stride_bits = bytes_for_bits(self.bits_per_shot) * 8;
        let start = i * stride_bits;
        &self.bits[start..start + self.bits_per_shot]
    }

    /// Indices of the detectors that fired in shot `i`.
    pub fn fired(&self, i: usize) -> Vec<usize> {
        self.shot(i).iter_ones().collect()
    }
}

/// Loads a Stim .b8 file holding records of `bits_per_shot` bits.
///
/// The file length must be a whole number of records. A zero-width record
/// cannot be counted from the file alone, so `bits_per_shot` must be positive.
pub fn load_b8_file<P: AsRef<Path>>(path: P, bits_per_shot: usize) -> Result<ShotTable> {
    let path = path.as_ref();
    ensure!(bits_per_shot > 0, "cannot split a b8 file into zero-width shots");

    let mut file = File::open(path)
        .with_context(|| format!("Failed to open .b8 file {}", path.display()))?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;

    let record_bytes = bytes_for_bits(bits_per_shot);
    ensure!(
        buffer.len() % record_bytes == 0,
        "{} holds {} bytes, not a multiple of the {record_bytes} byte record",
        path.display(),
        buffer.len()
    );
    let num_shots = buffer.len() / record_bytes;

    // Stim writes b8 little-endian, bit 0 first.
    Ok(ShotTable {
        bits: BitVec::<u8, Lsb0>::from_vec(buffer),
        bits_per_shot,
        num_shots,
    })
}
