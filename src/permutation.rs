//! Permutations with constant-time forward and logarithmic-time backward access.
#![cfg(target_pointer_width = "64")]

use std::io::{Read, Write};

use anyhow::{anyhow, Result};

use crate::bit_vectors::{Rank, RsBitVector};
use crate::int_vectors::CompactVector;
use crate::{utils, Serializable};

/// Permutation of `0..n` with constant-time `next` and amortized
/// $`O(\lg n)`$ `previous`.
///
/// The mapping itself is a packed array of width `⌈lg n⌉`. Along every cycle
/// of the permutation, a shortcut back to the previous marked element is
/// planted every `max(⌈lg n⌉, 1)` steps. An inverse query walks forward to
/// the nearest marked element, takes its shortcut, and finishes the bounded
/// remainder of the cycle, so the whole structure needs only $`O(n)`$ extra
/// bits beyond the mapping.
///
/// # Examples
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use gralz::permutation::Permutation;
///
/// let perm = Permutation::from_slice(&[2, 0, 3, 1])?;
///
/// assert_eq!(perm.next(0), Some(2));
/// assert_eq!(perm.previous(2), Some(0));
///
/// assert_eq!(perm.next(3), Some(1));
/// assert_eq!(perm.previous(1), Some(3));
/// # Ok(())
/// # }
/// ```
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    perm: CompactVector,
    shortcuts: CompactVector,
    shortcut_pos: RsBitVector,
    spacing: usize,
}

impl Permutation {
    /// Creates a new permutation from a slice of values.
    ///
    /// # Arguments
    ///
    /// - `vals`: The mapping, which must contain every integer in
    ///   `0..vals.len()` exactly once.
    ///
    /// # Errors
    ///
    /// An error is returned if `vals` is not a permutation of `0..vals.len()`.
    pub fn from_slice(vals: &[usize]) -> Result<Self> {
        let n = vals.len();
        if n == 0 {
            return Ok(Self::default());
        }

        let mut seen = vec![false; n];
        for &v in vals {
            if v >= n {
                return Err(anyhow!("vals must consist of integers in 0..{n}, but got {v}."));
            }
            if seen[v] {
                return Err(anyhow!("vals must not contain duplicates, but {v} appears twice."));
            }
            seen[v] = true;
        }

        let width = utils::needed_bits((n - 1) as u64);
        let spacing = width.max(1);

        let mut perm = CompactVector::with_capacity(n, width)?;
        for &v in vals {
            perm.push_int(v as u64)?;
        }

        // Plant a shortcut to the previous marked element every `spacing`
        // steps along each cycle, closing the loop at the cycle's anchor.
        let mut visited = std::mem::take(&mut seen);
        visited.iter_mut().for_each(|v| *v = false);
        let mut marks: Vec<(usize, usize)> = vec![];
        for s in 0..n {
            if visited[s] {
                continue;
            }
            let first_mark = marks.len();
            let mut cur = s;
            let mut step = 0;
            loop {
                visited[cur] = true;
                if step % spacing == 0 {
                    marks.push((cur, 0));
                }
                step += 1;
                cur = vals[cur];
                if cur == s {
                    break;
                }
            }
            let num_marks = marks.len() - first_mark;
            for j in 0..num_marks {
                let prev = marks[first_mark + (j + num_marks - 1) % num_marks].0;
                marks[first_mark + j].1 = prev;
            }
        }
        marks.sort_by_key(|&(pos, _)| pos);

        let mut shortcut_bits = crate::bit_vectors::BitVector::from_bit(false, n);
        let mut shortcuts = CompactVector::with_capacity(marks.len(), width)?;
        for &(pos, dest) in &marks {
            shortcut_bits.set_bit(pos, true)?;
            shortcuts.push_int(dest as u64)?;
        }

        Ok(Self {
            perm,
            shortcuts,
            shortcut_pos: RsBitVector::new(shortcut_bits),
            spacing,
        })
    }

    /// Returns the value the `i`-th element maps to, or [`None`] if out of
    /// bounds.
    ///
    /// # Complexity
    ///
    /// Constant
    #[inline(always)]
    pub fn next(&self, i: usize) -> Option<usize> {
        self.perm.get_int(i)
    }

    /// Returns the element mapping to `i`, or [`None`] if out of bounds.
    ///
    /// # Complexity
    ///
    /// $`O(\lg n)`$ amortized
    pub fn previous(&self, i: usize) -> Option<usize> {
        if self.len() <= i {
            return None;
        }
        let mut cur = i;
        while !self.shortcut_pos.get_bit(cur).unwrap() {
            cur = self.perm.get_int(cur).unwrap();
        }
        let rank = self.shortcut_pos.rank1(cur).unwrap();
        cur = self.shortcuts.get_int(rank).unwrap();
        while self.perm.get_int(cur).unwrap() != i {
            cur = self.perm.get_int(cur).unwrap();
        }
        Some(cur)
    }

    /// Gets the number of elements.
    #[inline(always)]
    pub const fn len(&self) -> usize {
        self.perm.len()
    }

    /// Checks if the permutation is empty.
    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gets the spacing between shortcuts along a cycle.
    #[inline(always)]
    pub const fn shortcut_spacing(&self) -> usize {
        self.spacing
    }
}

impl Serializable for Permutation {
    fn serialize_into<W: Write>(&self, mut writer: W) -> Result<usize> {
        let mut mem = self.perm.serialize_into(&mut writer)?;
        mem += self.shortcuts.serialize_into(&mut writer)?;
        mem += self.shortcut_pos.serialize_into(&mut writer)?;
        mem += self.spacing.serialize_into(&mut writer)?;
        Ok(mem)
    }

    fn deserialize_from<R: Read>(mut reader: R) -> Result<Self> {
        let perm = CompactVector::deserialize_from(&mut reader)?;
        let shortcuts = CompactVector::deserialize_from(&mut reader)?;
        let shortcut_pos = RsBitVector::deserialize_from(&mut reader)?;
        let spacing = usize::deserialize_from(&mut reader)?;
        Ok(Self {
            perm,
            shortcuts,
            shortcut_pos,
            spacing,
        })
    }

    fn size_in_bytes(&self) -> usize {
        self.perm.size_in_bytes()
            + self.shortcuts.size_in_bytes()
            + self.shortcut_pos.size_in_bytes()
            + std::mem::size_of::<usize>()
    }
}
