/// Word-packed bit storage used for per-node flags.
///
/// Flags are stored 64 to a `u64` word. Callers size the storage with
/// [`BitPack::words_for`] and index it by node.
pub struct BitPack;

impl BitPack {
    /// Number of `u64` words needed to hold `bits` flags.
    #[inline(always)]
    pub const fn words_for(bits: usize) -> usize {
        bits.div_ceil(64)
    }

    #[inline(always)]
    pub fn get(storage: &[u64], index: usize) -> bool {
        let word = storage[index / 64];
        let bit = index % 64;
        (word >> bit) & 1 == 1
    }

    #[inline(always)]
    pub fn toggle(storage: &mut [u64], index: usize) {
        storage[index / 64] ^= 1 << (index % 64);
    }

    #[inline(always)]
    pub fn set(storage: &mut [u64], index: usize, val: bool) {
        let word_idx = index / 64;
        let mask = 1u64 << (index % 64);
        if val {
            storage[word_idx] |= mask;
        } else {
            storage[word_idx] &= !mask;
        }
    }

    /// Resizes `storage` to hold `bits` flags and clears every flag.
    pub fn reset(storage: &mut Vec<u64>, bits: usize) {
        storage.clear();
        storage.resize(Self::words_for(bits), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::BitPack;

    #[test]
    fn flags_cross_word_boundaries() {
        let mut storage = Vec::new();
        BitPack::reset(&mut storage, 130);
        assert_eq!(storage.len(), 3);

        BitPack::set(&mut storage, 63, true);
        BitPack::toggle(&mut storage, 64);
        BitPack::toggle(&mut storage, 129);
        assert!(BitPack::get(&storage, 63));
        assert!(BitPack::get(&storage, 64));
        assert!(BitPack::get(&storage, 129));
        assert!(!BitPack::get(&storage, 65));

        BitPack::set(&mut storage, 63, false);
        BitPack::toggle(&mut storage, 64);
        assert!(!BitPack::get(&storage, 63));
        assert!(!BitPack::get(&storage, 64));
    }
}
