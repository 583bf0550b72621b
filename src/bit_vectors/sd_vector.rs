//! Very sparse bit vectors in the Elias-Fano scheme.
#![cfg(target_pointer_width = "64")]

use std::io::{Read, Write};

use anyhow::{anyhow, Result};

use crate::bit_vectors::{BitVector, NumBits, Rank, RsBitVector, Select};
use crate::broadword;
use crate::Serializable;

/// Very sparse bit vector in the Elias-Fano scheme.
///
/// The positions of the set bits are split into high and low halves: the low
/// `⌊lg(u/n)⌋` bits go into a packed array, the high halves are unary-coded
/// into a dense bit vector carrying select indexes. This takes
/// $`n \lceil \lg \frac{u}{n} \rceil + 2n + o(n)`$ bits for $`n`$ set bits out
/// of a universe of $`u`$, while answering select1 in constant time and rank1
/// in $`O(\lg \frac{u}{n})`$.
///
/// # Notes
///
/// This data structure does not support select0.
///
/// # Examples
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use gralz::bit_vectors::{SdVectorBuilder, NumBits, Rank, Select};
///
/// let mut b = SdVectorBuilder::new(8, 3)?;
/// b.extend([1, 3, 7])?;
/// let sv = b.build().enable_rank();
///
/// assert_eq!(sv.len(), 8);
/// assert_eq!(sv.num_ones(), 3);
///
/// assert_eq!(sv.select1(0), Some(1));
/// assert_eq!(sv.select1(2), Some(7));
///
/// assert_eq!(sv.rank1(4), Some(2));
/// assert_eq!(sv.rank1(8), Some(3));
/// # Ok(())
/// # }
/// ```
///
/// # References
///
///  - P. Elias, "Efficient storage and retrieval by content and address of static files,"
///    Journal of the ACM, 1974.
///  - D. Okanohara, and K. Sadakane, "Practical Entropy-Compressed Rank/Select Dictionary,"
///    In ALENEX, 2007.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct SdVector {
    high_bits: RsBitVector,
    low_bits: BitVector,
    low_len: usize,
    universe: usize,
    num_ones: usize,
    has_rank: bool,
}

impl SdVector {
    /// Creates a new vector from input bit stream `bits`.
    pub fn from_bits<I>(bits: I) -> Result<Self>
    where
        I: IntoIterator<Item = bool>,
    {
        let mut positions = vec![];
        let mut universe = 0;
        for (i, b) in bits.into_iter().enumerate() {
            if b {
                positions.push(i);
            }
            universe = i + 1;
        }
        let mut builder = SdVectorBuilder::new(universe, positions.len())?;
        builder.extend(positions)?;
        Ok(builder.build())
    }

    /// Builds an index to enable [`Self::rank1()`].
    #[must_use]
    pub fn enable_rank(mut self) -> Self {
        if self.num_ones != 0 {
            self.high_bits = self.high_bits.enable_select0();
        }
        self.has_rank = true;
        self
    }

    /// Checks if [`Self::enable_rank()`] is set.
    #[inline(always)]
    pub const fn has_rank(&self) -> bool {
        self.has_rank
    }

    /// Gets the number of bits, i.e., the universe.
    #[inline(always)]
    pub const fn len(&self) -> usize {
        self.universe
    }

    /// Checks if the vector is empty.
    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    fn low(&self, k: usize) -> usize {
        self.low_bits.get_bits(k * self.low_len, self.low_len).unwrap() as usize
    }
}

impl NumBits for SdVector {
    #[inline(always)]
    fn num_bits(&self) -> usize {
        self.universe
    }

    #[inline(always)]
    fn num_ones(&self) -> usize {
        self.num_ones
    }
}

impl Rank for SdVector {
    /// Returns the number of ones from the 0-th bit to the `pos-1`-th bit, or
    /// [`None`] if `self.len() < pos`.
    ///
    /// # Complexity
    ///
    /// $`O(\lg \frac{u}{n})`$
    ///
    /// # Panics
    ///
    /// It panics if the index is not built by [`Self::enable_rank()`].
    fn rank1(&self, pos: usize) -> Option<usize> {
        assert!(self.has_rank(), "enable_rank() must be set up.");
        if self.universe < pos {
            return None;
        }
        if self.num_ones == 0 {
            return Some(0);
        }
        if self.universe == pos {
            return Some(self.num_ones);
        }

        let h_rank = pos >> self.low_len;
        let mut h_pos = self.high_bits.select0(h_rank).unwrap();
        let mut rank = h_pos - h_rank;
        let l_pos = pos & ((1 << self.low_len) - 1);

        while h_pos > 0
            && self.high_bits.get_bit(h_pos - 1).unwrap()
            && self.low(rank - 1) >= l_pos
        {
            rank -= 1;
            h_pos -= 1;
        }
        Some(rank)
    }

    /// Returns the number of zeros from the 0-th bit to the `pos-1`-th bit, or
    /// [`None`] if `self.len() < pos`.
    fn rank0(&self, pos: usize) -> Option<usize> {
        Some(pos - self.rank1(pos)?)
    }
}

impl Select for SdVector {
    /// Returns the position of the `k`-th set bit, or
    /// [`None`] if `self.num_ones() <= k`.
    ///
    /// # Complexity
    ///
    /// Constant
    fn select1(&self, k: usize) -> Option<usize> {
        if self.num_ones <= k {
            return None;
        }
        Some(((self.high_bits.select1(k).unwrap() - k) << self.low_len) | self.low(k))
    }

    /// Panics always because this operation is not supported.
    fn select0(&self, _k: usize) -> Option<usize> {
        panic!("This operation is not supported.");
    }
}

impl Serializable for SdVector {
    fn serialize_into<W: Write>(&self, mut writer: W) -> Result<usize> {
        let mut mem = self.high_bits.serialize_into(&mut writer)?;
        mem += self.low_bits.serialize_into(&mut writer)?;
        mem += self.low_len.serialize_into(&mut writer)?;
        mem += self.universe.serialize_into(&mut writer)?;
        mem += self.num_ones.serialize_into(&mut writer)?;
        mem += self.has_rank.serialize_into(&mut writer)?;
        Ok(mem)
    }

    fn deserialize_from<R: Read>(mut reader: R) -> Result<Self> {
        let high_bits = RsBitVector::deserialize_from(&mut reader)?;
        let low_bits = BitVector::deserialize_from(&mut reader)?;
        let low_len = usize::deserialize_from(&mut reader)?;
        let universe = usize::deserialize_from(&mut reader)?;
        let num_ones = usize::deserialize_from(&mut reader)?;
        let has_rank = bool::deserialize_from(&mut reader)?;
        Ok(Self {
            high_bits,
            low_bits,
            low_len,
            universe,
            num_ones,
            has_rank,
        })
    }

    fn size_in_bytes(&self) -> usize {
        self.high_bits.size_in_bytes()
            + self.low_bits.size_in_bytes()
            + std::mem::size_of::<usize>() * 3
            + 1
    }
}

/// Builder for [`SdVector`].
///
/// # Examples
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use gralz::bit_vectors::SdVectorBuilder;
///
/// let mut b = SdVectorBuilder::new(8, 3)?;
/// b.push(1)?;
/// b.extend([3, 7])?;
///
/// let sv = b.build();
/// assert_eq!(sv.len(), 8);
/// # Ok(())
/// # }
/// ```
pub struct SdVectorBuilder {
    high_bits: BitVector,
    low_bits: BitVector,
    universe: usize,
    num_vals: usize,
    pos: usize,
    last: usize,
    low_len: usize,
}

impl SdVectorBuilder {
    /// Creates a new builder.
    ///
    /// # Arguments
    ///
    /// - `universe`: The number of bits, i.e., the (exclusive) upper bound of set positions.
    /// - `num_vals`: The number of positions that will be pushed.
    ///
    /// # Errors
    ///
    /// An error is returned if `universe < num_vals`.
    pub fn new(universe: usize, num_vals: usize) -> Result<Self> {
        if universe < num_vals {
            return Err(anyhow!(
                "universe must be no less than num_vals={num_vals}, but got {universe}."
            ));
        }
        if num_vals == 0 {
            return Ok(Self {
                high_bits: BitVector::new(),
                low_bits: BitVector::new(),
                universe,
                num_vals,
                pos: 0,
                last: 0,
                low_len: 0,
            });
        }
        let low_len = broadword::msb((universe / num_vals) as u64).unwrap_or(0);
        Ok(Self {
            high_bits: BitVector::from_bit(false, (num_vals + 1) + (universe >> low_len) + 1),
            low_bits: BitVector::new(),
            universe,
            num_vals,
            pos: 0,
            last: 0,
            low_len,
        })
    }

    /// Pushes a set position at the end.
    ///
    /// # Arguments
    ///
    /// - `val`: Pushed position that must be no less than the last one.
    ///
    /// # Errors
    ///
    /// An error is returned if
    ///
    /// - `val` is less than the last one,
    /// - `val` is no less than the universe, or
    /// - the number of stored positions exceeds the declared one.
    pub fn push(&mut self, val: usize) -> Result<()> {
        if val < self.last {
            return Err(anyhow!(
                "val must be no less than the last one {}, but got {val}.",
                self.last
            ));
        }
        if self.universe <= val {
            return Err(anyhow!(
                "val must be less than universe={}, but got {val}.",
                self.universe
            ));
        }
        if self.num_vals <= self.pos {
            return Err(anyhow!(
                "the number of pushed positions must not exceed num_vals={}.",
                self.num_vals
            ));
        }

        self.last = val;
        if self.low_len != 0 {
            let low_mask = (1 << self.low_len) - 1;
            self.low_bits
                .push_bits((val & low_mask) as u64, self.low_len)
                .unwrap();
        }
        self.high_bits
            .set_bit((val >> self.low_len) + self.pos, true)
            .unwrap();
        self.pos += 1;
        Ok(())
    }

    /// Pushes positions at the end.
    ///
    /// # Errors
    ///
    /// An error is returned under the same conditions as [`Self::push()`].
    pub fn extend<I>(&mut self, vals: I) -> Result<()>
    where
        I: IntoIterator<Item = usize>,
    {
        for x in vals {
            self.push(x)?;
        }
        Ok(())
    }

    /// Builds [`SdVector`] from the pushed positions.
    pub fn build(self) -> SdVector {
        let high_bits = if self.pos != 0 {
            RsBitVector::new(self.high_bits).enable_select1()
        } else {
            RsBitVector::default()
        };
        SdVector {
            high_bits,
            low_bits: self.low_bits,
            low_len: self.low_len,
            universe: self.universe,
            num_ones: self.pos,
            has_rank: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaChaRng;

    #[test]
    fn test_random_sparse_against_naive() {
        let mut rng = ChaChaRng::seed_from_u64(334);
        let universe = 10000;
        let bits: Vec<bool> = (0..universe).map(|_| rng.gen_bool(0.02)).collect();
        let sv = SdVector::from_bits(bits.iter().cloned()).unwrap().enable_rank();

        let mut ones = 0;
        for (i, &b) in bits.iter().enumerate() {
            assert_eq!(sv.rank1(i), Some(ones));
            if b {
                assert_eq!(sv.select1(ones), Some(i));
                ones += 1;
            }
        }
        assert_eq!(sv.rank1(universe), Some(ones));
        assert_eq!(sv.select1(ones), None);
        assert_eq!(sv.num_ones(), ones);
    }

    #[test]
    fn test_all_zeros() {
        let sv = SdVector::from_bits([false, false, false]).unwrap().enable_rank();
        assert_eq!(sv.len(), 3);
        assert_eq!(sv.num_ones(), 0);
        assert_eq!(sv.rank1(3), Some(0));
        assert_eq!(sv.select1(0), None);
    }

    #[test]
    fn test_empty() {
        let sv = SdVector::from_bits([]).unwrap().enable_rank();
        assert_eq!(sv.len(), 0);
        assert_eq!(sv.rank1(0), Some(0));
        assert_eq!(sv.rank1(1), None);
    }

    #[test]
    #[should_panic]
    fn test_rank1_panic() {
        let sv = SdVector::from_bits([false, true, false]).unwrap();
        sv.rank1(1);
    }

    #[test]
    #[should_panic]
    fn test_select0_panic() {
        let sv = SdVector::from_bits([false, true, false]).unwrap();
        sv.select0(0);
    }

    #[test]
    fn test_builder_push_decrease() {
        let mut b = SdVectorBuilder::new(3, 2).unwrap();
        b.push(2).unwrap();
        let e = b.push(1);
        assert_eq!(
            e.err().map(|x| x.to_string()),
            Some("val must be no less than the last one 2, but got 1.".to_string())
        );
    }

    #[test]
    fn test_builder_overflow_universe() {
        let mut b = SdVectorBuilder::new(3, 2).unwrap();
        let e = b.push(3);
        assert_eq!(
            e.err().map(|x| x.to_string()),
            Some("val must be less than universe=3, but got 3.".to_string())
        );
    }

    #[test]
    fn test_builder_overflow_num_vals() {
        let mut b = SdVectorBuilder::new(3, 1).unwrap();
        b.push(1).unwrap();
        let e = b.push(2);
        assert_eq!(
            e.err().map(|x| x.to_string()),
            Some("the number of pushed positions must not exceed num_vals=1.".to_string())
        );
    }

    #[test]
    fn test_serialize() {
        let mut bytes = vec![];
        let sv = SdVector::from_bits([true, false, false, true]).unwrap().enable_rank();
        let size = sv.serialize_into(&mut bytes).unwrap();
        let other = SdVector::deserialize_from(&bytes[..]).unwrap();
        assert_eq!(sv, other);
        assert_eq!(size, bytes.len());
        assert_eq!(size, sv.size_in_bytes());
    }
}
