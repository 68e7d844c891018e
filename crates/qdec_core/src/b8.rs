//! Bit-packed b8 shot records.
//!
//! A record of `count` bits occupies `ceil(count / 8)` bytes. Bit `i` lives in
//! bit `i % 8` of byte `i / 8` (least-significant bit first), and any unused
//! high bits of the final byte are zero. Streams of records are plain
//! concatenations: there is no shot count, delimiter, or length prefix, so the
//! reader must learn the number of shots out of band.

use crate::{ProtocolError, Result};
use bitvec::prelude::*;

pub use qdec_common::bytes_for_bits as bytes_per_record;

/// Packs `count` bits into a freshly allocated b8 record.
///
/// Fails with a format error if `bits` does not hold exactly `count` values.
pub fn encode(bits: &[bool], count: usize) -> Result<Vec<u8>> {
    if bits.len() != count {
        return Err(ProtocolError::format(format!(
            "expected {count} bits to encode, got {}",
            bits.len()
        )));
    }
    let mut out = Vec::with_capacity(bytes_per_record(count));
    encode_into(bits, &mut out);
    Ok(out)
}

/// Appends the b8 encoding of `bits` to `out`.
pub fn encode_into(bits: &[bool], out: &mut Vec<u8>) {
    let mut packed: BitVec<u8, Lsb0> = bits.iter().copied().collect();
    packed.set_uninitialized(false);
    out.extend_from_slice(packed.as_raw_slice());
}

/// Unpacks a b8 record of `count` bits.
///
/// Fails with a format error if `bytes` is not exactly `ceil(count / 8)` long.
pub fn decode(bytes: &[u8], count: usize) -> Result<Vec<bool>> {
    check_record_len(bytes, count)?;
    Ok(bytes.view_bits::<Lsb0>()[..count].iter().by_vals().collect())
}

/// Unpacks a b8 record into an existing buffer, reusing its allocation.
pub fn decode_bits_into(bytes: &[u8], count: usize, out: &mut Vec<bool>) -> Result<()> {
    check_record_len(bytes, count)?;
    out.clear();
    out.extend(bytes.view_bits::<Lsb0>()[..count].iter().by_vals());
    Ok(())
}

/// Iterates the indices of set bits among the first `count` bits of a record.
///
/// This is the sparse syndrome form decoders work with. `count` is clamped to
/// the bits actually present in `record`.
pub fn set_indices(record: &[u8], count: usize) -> impl Iterator<Item = usize> + '_ {
    let bits = record.view_bits::<Lsb0>();
    let live = count.min(bits.len());
    bits[..live].iter_ones()
}

/// Writes the low `num_obs` bits of `mask` into `out` as a b8 record.
///
/// `out` must be exactly `ceil(num_obs / 8)` bytes long and `num_obs` must be
/// at most 64; bits of `mask` at or above `num_obs` are discarded.
pub fn pack_mask(mask: u64, num_obs: usize, out: &mut [u8]) -> Result<()> {
    if num_obs > 64 {
        return Err(ProtocolError::format(format!(
            "a u64 mask cannot carry {num_obs} observables"
        )));
    }
    check_record_len(out, num_obs)?;
    let live = if num_obs == 64 {
        mask
    } else {
        mask & ((1u64 << num_obs) - 1)
    };
    out.copy_from_slice(&live.to_le_bytes()[..out.len()]);
    Ok(())
}

fn check_record_len(bytes: &[u8], count: usize) -> Result<()> {
    let expected = bytes_per_record(count);
    if bytes.len() != expected {
        return Err(ProtocolError::format(format!(
            "record of {count} bits must be {expected} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}
