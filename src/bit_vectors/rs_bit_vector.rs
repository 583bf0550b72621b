//! Rank/select queries over dense bit vectors with block ranks and hinted selection.
#![cfg(target_pointer_width = "64")]

use std::io::{Read, Write};

use anyhow::Result;

use crate::bit_vectors::bit_vector::WORD_LEN;
use crate::bit_vectors::{Access, BitVector, NumBits, Rank, Select};
use crate::broadword;
use crate::Serializable;

const BLOCK_LEN: usize = 512;
const WORDS_PER_BLOCK: usize = BLOCK_LEN / WORD_LEN;
const BITS_PER_HINT: usize = 512;

/// Rank/select data structure over dense bit vectors.
///
/// A cumulative popcount is kept for every block of 512 bits, giving
/// constant-time rank with a bounded in-block scan. Select queries walk the
/// block counters starting from a sampled hint recorded for every 512-th
/// occurrence, so they are constant time amortized as well. Select1 and
/// select0 carry separate hint arrays and are enabled independently.
///
/// # Examples
///
/// ```
/// use gralz::bit_vectors::{RsBitVector, Rank, Select};
///
/// let bv = RsBitVector::from_bits([true, false, false, true])
///     .enable_select1()
///     .enable_select0();
///
/// assert_eq!(bv.len(), 4);
/// assert_eq!(bv.rank1(1), Some(1));
/// assert_eq!(bv.rank0(1), Some(0));
/// assert_eq!(bv.select1(1), Some(3));
/// assert_eq!(bv.select0(0), Some(1));
/// ```
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RsBitVector {
    bv: BitVector,
    block_ranks: Vec<usize>,
    select1_hints: Option<Vec<usize>>,
    select0_hints: Option<Vec<usize>>,
    num_ones: usize,
}

impl RsBitVector {
    /// Creates a new vector from input bit vector `bv`.
    pub fn new(bv: BitVector) -> Self {
        let num_blocks = (bv.len() + BLOCK_LEN - 1) / BLOCK_LEN;
        let mut block_ranks = Vec::with_capacity(num_blocks + 1);
        let mut rank = 0;
        block_ranks.push(0);
        for b in 0..num_blocks {
            let beg = b * WORDS_PER_BLOCK;
            let end = bv.num_words().min(beg + WORDS_PER_BLOCK);
            for w in beg..end {
                rank += broadword::popcount(bv.words()[w]);
            }
            block_ranks.push(rank);
        }
        Self {
            bv,
            block_ranks,
            select1_hints: None,
            select0_hints: None,
            num_ones: rank,
        }
    }

    /// Creates a new vector from input bit stream `bits`.
    pub fn from_bits<I>(bits: I) -> Self
    where
        I: IntoIterator<Item = bool>,
    {
        Self::new(BitVector::from_bits(bits))
    }

    /// Builds the hint array accelerating [`Self::select1()`].
    #[must_use]
    pub fn enable_select1(mut self) -> Self {
        let num_blocks = self.block_ranks.len() - 1;
        let mut hints = vec![];
        let mut j = 0;
        for b in 0..num_blocks {
            while j * BITS_PER_HINT < self.num_ones && j * BITS_PER_HINT < self.block_ranks[b + 1]
            {
                hints.push(b);
                j += 1;
            }
        }
        self.select1_hints = Some(hints);
        self
    }

    /// Builds the hint array accelerating [`Self::select0()`].
    #[must_use]
    pub fn enable_select0(mut self) -> Self {
        let num_blocks = self.block_ranks.len() - 1;
        let num_zeros = self.bv.len() - self.num_ones;
        let mut hints = vec![];
        let mut j = 0;
        for b in 0..num_blocks {
            while j * BITS_PER_HINT < num_zeros && j * BITS_PER_HINT < self.zeros_at_block(b + 1) {
                hints.push(b);
                j += 1;
            }
        }
        self.select0_hints = Some(hints);
        self
    }

    /// Checks if [`Self::enable_select1()`] is set.
    #[inline(always)]
    pub const fn has_select1(&self) -> bool {
        self.select1_hints.is_some()
    }

    /// Checks if [`Self::enable_select0()`] is set.
    #[inline(always)]
    pub const fn has_select0(&self) -> bool {
        self.select0_hints.is_some()
    }

    /// Returns the `pos`-th bit, or [`None`] if out of bounds.
    #[inline(always)]
    pub fn get_bit(&self, pos: usize) -> Option<bool> {
        self.bv.get_bit(pos)
    }

    /// Gets the number of bits.
    #[inline(always)]
    pub const fn len(&self) -> usize {
        self.bv.len()
    }

    /// Checks if the vector is empty.
    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the reference to the internal bit vector.
    pub const fn bit_vector(&self) -> &BitVector {
        &self.bv
    }

    #[inline(always)]
    fn zeros_at_block(&self, b: usize) -> usize {
        self.bv.len().min(b * BLOCK_LEN) - self.block_ranks[b]
    }
}

impl Access for RsBitVector {
    /// Returns the `pos`-th bit, or [`None`] if out of bounds
    /// (just wrapping [`Self::get_bit()`]).
    fn access(&self, pos: usize) -> Option<bool> {
        self.get_bit(pos)
    }
}

impl NumBits for RsBitVector {
    #[inline(always)]
    fn num_bits(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn num_ones(&self) -> usize {
        self.num_ones
    }
}

impl Rank for RsBitVector {
    /// Returns the number of ones from the 0-th bit to the `pos-1`-th bit, or
    /// [`None`] if `self.len() < pos`.
    ///
    /// # Complexity
    ///
    /// Constant
    fn rank1(&self, pos: usize) -> Option<usize> {
        if self.bv.len() < pos {
            return None;
        }
        let block = pos / BLOCK_LEN;
        let mut r = self.block_ranks[block];
        for w in block * WORDS_PER_BLOCK..pos / WORD_LEN {
            r += broadword::popcount(self.bv.words()[w]);
        }
        let rem = pos % WORD_LEN;
        if rem != 0 {
            r += broadword::popcount(self.bv.words()[pos / WORD_LEN] & ((1 << rem) - 1));
        }
        Some(r)
    }

    /// Returns the number of zeros from the 0-th bit to the `pos-1`-th bit, or
    /// [`None`] if `self.len() < pos`.
    fn rank0(&self, pos: usize) -> Option<usize> {
        Some(pos - self.rank1(pos)?)
    }
}

impl Select for RsBitVector {
    /// Returns the position of the `k`-th set bit, or
    /// [`None`] if `self.num_ones() <= k`.
    ///
    /// # Complexity
    ///
    /// Constant (amortized)
    ///
    /// # Panics
    ///
    /// It panics if the index is not built by [`Self::enable_select1()`].
    fn select1(&self, k: usize) -> Option<usize> {
        let hints = self
            .select1_hints
            .as_ref()
            .expect("enable_select1() must be set up.");
        if self.num_ones <= k {
            return None;
        }
        let mut b = hints[k / BITS_PER_HINT];
        while self.block_ranks[b + 1] <= k {
            b += 1;
        }
        let mut r = self.block_ranks[b];
        let mut w = b * WORDS_PER_BLOCK;
        loop {
            let c = broadword::popcount(self.bv.words()[w]);
            if r + c > k {
                break;
            }
            r += c;
            w += 1;
        }
        Some(w * WORD_LEN + broadword::select_in_word(self.bv.words()[w], k - r).unwrap())
    }

    /// Returns the position of the `k`-th unset bit, or
    /// [`None`] if `self.num_zeros() <= k`.
    ///
    /// # Complexity
    ///
    /// Constant (amortized)
    ///
    /// # Panics
    ///
    /// It panics if the index is not built by [`Self::enable_select0()`].
    fn select0(&self, k: usize) -> Option<usize> {
        let hints = self
            .select0_hints
            .as_ref()
            .expect("enable_select0() must be set up.");
        if self.bv.len() - self.num_ones <= k {
            return None;
        }
        let mut b = hints[k / BITS_PER_HINT];
        while self.zeros_at_block(b + 1) <= k {
            b += 1;
        }
        let mut r = self.zeros_at_block(b);
        let mut w = b * WORDS_PER_BLOCK;
        loop {
            let valid = WORD_LEN.min(self.bv.len() - w * WORD_LEN);
            let c = valid - broadword::popcount(self.bv.words()[w]);
            if r + c > k {
                break;
            }
            r += c;
            w += 1;
        }
        Some(w * WORD_LEN + broadword::select_in_word(!self.bv.words()[w], k - r).unwrap())
    }
}

impl Serializable for RsBitVector {
    fn serialize_into<W: Write>(&self, mut writer: W) -> Result<usize> {
        let mut mem = self.bv.serialize_into(&mut writer)?;
        mem += self.block_ranks.serialize_into(&mut writer)?;
        mem += self.select1_hints.serialize_into(&mut writer)?;
        mem += self.select0_hints.serialize_into(&mut writer)?;
        mem += self.num_ones.serialize_into(&mut writer)?;
        Ok(mem)
    }

    fn deserialize_from<R: Read>(mut reader: R) -> Result<Self> {
        let bv = BitVector::deserialize_from(&mut reader)?;
        let block_ranks = Vec::<usize>::deserialize_from(&mut reader)?;
        let select1_hints = Option::<Vec<usize>>::deserialize_from(&mut reader)?;
        let select0_hints = Option::<Vec<usize>>::deserialize_from(&mut reader)?;
        let num_ones = usize::deserialize_from(&mut reader)?;
        Ok(Self {
            bv,
            block_ranks,
            select1_hints,
            select0_hints,
            num_ones,
        })
    }

    fn size_in_bytes(&self) -> usize {
        self.bv.size_in_bytes()
            + self.block_ranks.size_in_bytes()
            + self.select1_hints.size_in_bytes()
            + self.select0_hints.size_in_bytes()
            + std::mem::size_of::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaChaRng;

    fn gen_random_bits(len: usize, p: f64, seed: u64) -> Vec<bool> {
        let mut rng = ChaChaRng::seed_from_u64(seed);
        (0..len).map(|_| rng.gen_bool(p)).collect()
    }

    fn check_against_naive(bits: &[bool]) {
        let bv = RsBitVector::from_bits(bits.iter().cloned())
            .enable_select1()
            .enable_select0();
        let mut ones = 0;
        let mut zeros = 0;
        for (i, &b) in bits.iter().enumerate() {
            assert_eq!(bv.rank1(i), Some(ones));
            assert_eq!(bv.rank0(i), Some(zeros));
            if b {
                assert_eq!(bv.select1(ones), Some(i));
                ones += 1;
            } else {
                assert_eq!(bv.select0(zeros), Some(i));
                zeros += 1;
            }
        }
        assert_eq!(bv.rank1(bits.len()), Some(ones));
        assert_eq!(bv.select1(ones), None);
        assert_eq!(bv.select0(zeros), None);
        assert_eq!(bv.num_ones(), ones);
    }

    #[test]
    fn test_random_dense() {
        check_against_naive(&gen_random_bits(3000, 0.5, 334));
    }

    #[test]
    fn test_random_sparse() {
        check_against_naive(&gen_random_bits(3000, 0.01, 114514));
    }

    #[test]
    fn test_all_zeros() {
        let bv = RsBitVector::from_bits([false; 100]).enable_select1().enable_select0();
        assert_eq!(bv.rank1(100), Some(0));
        assert_eq!(bv.select1(0), None);
        assert_eq!(bv.select0(99), Some(99));
    }

    #[test]
    fn test_all_ones() {
        let bv = RsBitVector::from_bits([true; 100]).enable_select1().enable_select0();
        assert_eq!(bv.rank1(100), Some(100));
        assert_eq!(bv.select1(99), Some(99));
        assert_eq!(bv.select0(0), None);
    }

    #[test]
    fn test_empty() {
        let bv = RsBitVector::from_bits([]).enable_select1();
        assert_eq!(bv.len(), 0);
        assert_eq!(bv.rank1(0), Some(0));
        assert_eq!(bv.rank1(1), None);
        assert_eq!(bv.select1(0), None);
    }

    #[test]
    #[should_panic]
    fn test_select1_panic() {
        let bv = RsBitVector::from_bits([false, true, false]);
        bv.select1(0);
    }

    #[test]
    #[should_panic]
    fn test_select0_panic() {
        let bv = RsBitVector::from_bits([false, true, false]);
        bv.select0(0);
    }

    #[test]
    fn test_serialize() {
        let mut bytes = vec![];
        let bv = RsBitVector::from_bits(gen_random_bits(1000, 0.5, 42)).enable_select1();
        let size = bv.serialize_into(&mut bytes).unwrap();
        let other = RsBitVector::deserialize_from(&bytes[..]).unwrap();
        assert_eq!(bv, other);
        assert_eq!(size, bytes.len());
        assert_eq!(size, bv.size_in_bytes());
    }
}
