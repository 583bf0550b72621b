//! Grammar accessor resuming queries from equidistant text-position samples.
#![cfg(target_pointer_width = "64")]

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{anyhow, Result};

use crate::grammar::{Grammar, RULE_OFFSET};
use crate::int_vectors::CompactVector;
use crate::queries::naive::compute_expansion_lens;
use crate::queries::RandomAccess;
use crate::{utils, Serializable};

/// Grammar accessor with text-position samples every `SAMPLING` characters.
///
/// On top of the renumbered grammar and its bottom-up expansion lengths,
/// two guides are precomputed:
///
/// - per-rule prefix sums over the children's expansion lengths, so the
///   child containing a text offset is found by binary search;
/// - one sample per `SAMPLING`-aligned block of text positions, recording
///   the deepest rule whose expansion fully contains the block together
///   with the child covering the block's first position.
///
/// A query resumes the derivation walk at its block's sample and only ever
/// moves rightward, so it touches $`O(\Delta)`$ symbols in expectation for
/// sampling distance $`\Delta`$. Substring extraction splits the request at
/// block boundaries and replays the same walk per block. The standard
/// sampling distances are exposed as [`SampledScanGrammar512`],
/// [`SampledScanGrammar6400`], and [`SampledScanGrammar25600`], trading
/// index space for query time.
///
/// # Examples
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use gralz::grammar::{Grammar, RULE_OFFSET};
/// use gralz::int_vectors::CompactVector;
/// use gralz::queries::{RandomAccess, SampledScanGrammar};
///
/// // R0 -> 'a' 'b', R1 -> R0 R0; derives "abab".
/// let grammar = Grammar::new(
///     vec![
///         CompactVector::from_slice(&[b'a' as usize, b'b' as usize])?,
///         CompactVector::from_slice(&[RULE_OFFSET, RULE_OFFSET])?,
///     ],
///     1,
/// )?;
/// let accessor = SampledScanGrammar::<2>::new(grammar)?;
///
/// assert_eq!(accessor.at(2), Some(b'a'));
///
/// let mut buf = [0; 3];
/// assert_eq!(accessor.substr(1, &mut buf), 3);
/// assert_eq!(&buf, b"bab");
/// # Ok(())
/// # }
/// ```
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct SampledScanGrammar<const SAMPLING: usize = 6400> {
    rules: Vec<CompactVector>,
    start_rule_id: usize,
    start_rule_len: usize,
    expansion_lens: CompactVector,
    child_offsets: Vec<CompactVector>,
    sample_rules: CompactVector,
    sample_children: CompactVector,
    sample_back_offs: CompactVector,
}

/// Preset with the fastest queries and the largest sample index.
pub type SampledScanGrammar512 = SampledScanGrammar<512>;
/// Preset balancing sample index size and query time.
pub type SampledScanGrammar6400 = SampledScanGrammar<6400>;
/// Preset with the smallest sample index and the slowest queries.
pub type SampledScanGrammar25600 = SampledScanGrammar<25600>;

impl<const SAMPLING: usize> SampledScanGrammar<SAMPLING> {
    /// Creates a new accessor consuming `grammar`.
    ///
    /// # Errors
    ///
    /// An error is returned if `SAMPLING` is zero or the grammar's
    /// derivation graph contains a cycle.
    pub fn new(mut grammar: Grammar) -> Result<Self> {
        if SAMPLING == 0 {
            return Err(anyhow!("SAMPLING must be nonzero."));
        }
        grammar.dependency_renumber()?;
        let start_rule_id = grammar.start_rule_id();
        let rules = grammar.rules().to_vec();
        let (start_rule_len, expansion_lens) = compute_expansion_lens(&rules)?;

        let mut this = Self {
            rules,
            start_rule_id,
            start_rule_len,
            expansion_lens,
            child_offsets: vec![],
            sample_rules: CompactVector::default(),
            sample_children: CompactVector::default(),
            sample_back_offs: CompactVector::default(),
        };
        this.build_child_offsets()?;
        this.build_samples()?;
        Ok(this)
    }

    /// Loads a tuple-encoded grammar file and builds the accessor over it.
    ///
    /// # Errors
    ///
    /// An error is returned if the file cannot be read or decoded.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(Grammar::from_file(path)?)
    }

    /// Returns the number of rules.
    #[inline(always)]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Returns the expansion length of the rule with the given id.
    #[inline(always)]
    pub fn rule_length(&self, rule_id: usize) -> usize {
        if rule_id == self.start_rule_id {
            self.start_rule_len
        } else {
            self.expansion_lens.get_int(rule_id).unwrap()
        }
    }

    /// Returns the number of samples.
    #[inline(always)]
    pub fn sample_count(&self) -> usize {
        self.sample_rules.len()
    }

    fn build_child_offsets(&mut self) -> Result<()> {
        let mut offsets = Vec::with_capacity(self.rules.len());
        for rule_id in 0..self.rules.len() {
            let width = utils::needed_bits(self.rule_length(rule_id) as u64);
            let mut sums = CompactVector::with_capacity(self.rules[rule_id].len() + 1, width)?;
            let mut acc = 0u64;
            sums.push_int(0)?;
            for symbol in self.rules[rule_id].iter() {
                acc += self.symbol_length(symbol) as u64;
                sums.push_int(acc)?;
            }
            offsets.push(sums);
        }
        self.child_offsets = offsets;
        Ok(())
    }

    fn build_samples(&mut self) -> Result<()> {
        let n = self.start_rule_len;
        if n == 0 {
            return Ok(());
        }
        let sample_count = utils::ceiled_divide(n, SAMPLING);
        let mut rules = vec![0usize; sample_count];
        let mut children = vec![0usize; sample_count];
        let mut back_offs = vec![0usize; sample_count];
        let mut dirty = vec![false; sample_count];

        // Rules are visited top-down, so the last writer of a sample is the
        // deepest rule whose expansion fully contains the block. The symbol
        // pass that follows within the same visit records which child covers
        // the block's first position.
        let mut queue = VecDeque::new();
        queue.push_back((0usize, self.start_rule_id));
        while let Some((start, rule_id)) = queue.pop_front() {
            let rule_len = self.rule_length(rule_id);
            let first = utils::ceiled_divide(start, SAMPLING);
            let mut last = (start + rule_len) / SAMPLING;
            if start + rule_len == n {
                last += 1;
            }
            for b in first..last.min(sample_count) {
                rules[b] = rule_id;
                dirty[b] = true;
            }

            let mut pos = start;
            for (index, symbol) in self.rules[rule_id].iter().enumerate() {
                let symbol_len = self.symbol_length(symbol);
                if symbol_len != 0 {
                    let b_first = utils::ceiled_divide(pos, SAMPLING);
                    let b_last = (pos + symbol_len - 1) / SAMPLING;
                    for b in b_first..=b_last {
                        if b < sample_count && dirty[b] {
                            children[b] = index;
                            back_offs[b] = b * SAMPLING - pos;
                            dirty[b] = false;
                        }
                    }
                }
                if Grammar::is_non_terminal(symbol) {
                    queue.push_back((pos, symbol - RULE_OFFSET));
                }
                pos += symbol_len;
            }
        }

        self.sample_rules = CompactVector::from_slice(&rules)?;
        self.sample_children = CompactVector::from_slice(&children)?;
        self.sample_back_offs = CompactVector::from_slice(&back_offs)?;
        Ok(())
    }

    #[inline(always)]
    fn symbol_length(&self, symbol: usize) -> usize {
        if Grammar::is_terminal(symbol) {
            1
        } else {
            self.rule_length(symbol - RULE_OFFSET)
        }
    }

    #[inline(always)]
    fn child_offset(&self, rule_id: usize, index: usize) -> usize {
        self.child_offsets[rule_id].get_int(index).unwrap()
    }

    /// Returns the largest child index in `index_from..` whose offset within
    /// `rule_id` is at most `rel`.
    fn find_child(&self, rule_id: usize, index_from: usize, rel: usize) -> usize {
        let offsets = &self.child_offsets[rule_id];
        let mut lo = index_from;
        let mut hi = offsets.len() - 1;
        while lo + 1 < hi {
            let mid = (lo + hi) / 2;
            if offsets.get_int(mid).unwrap() <= rel {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Returns the resume state of block `b`: the sampled rule, the index of
    /// the child covering the block start, and that child's start position.
    #[inline(always)]
    fn sample(&self, b: usize) -> (usize, usize, usize) {
        let rule_id = self.sample_rules.get_int(b).unwrap();
        let index = self.sample_children.get_int(b).unwrap();
        let pos = b * SAMPLING - self.sample_back_offs.get_int(b).unwrap();
        (rule_id, index, pos)
    }

    /// Extracts `[start, end)` into `buf`, assuming the range lies in one
    /// sampling block.
    fn extract_block(&self, start: usize, end: usize, buf: &mut [u8]) -> usize {
        let (mut rule, mut index, mut pos) = self.sample(start / SAMPLING);
        let mut stack: Vec<(usize, usize)> = vec![];
        let mut written = 0;
        loop {
            if index == self.rules[rule].len() {
                let (parent, parent_index) = stack.pop().unwrap();
                rule = parent;
                index = parent_index + 1;
                continue;
            }
            let symbol = self.rules[rule].get_int(index).unwrap();
            let symbol_len =
                self.child_offset(rule, index + 1) - self.child_offset(rule, index);
            if pos + symbol_len <= start {
                pos += symbol_len;
                index += 1;
            } else if Grammar::is_terminal(symbol) {
                buf[written] = symbol as u8;
                written += 1;
                pos += 1;
                index += 1;
                if pos == end {
                    return written;
                }
            } else {
                stack.push((rule, index));
                rule = symbol - RULE_OFFSET;
                index = 0;
            }
        }
    }
}

impl<const SAMPLING: usize> RandomAccess for SampledScanGrammar<SAMPLING> {
    #[inline(always)]
    fn source_length(&self) -> usize {
        self.start_rule_len
    }

    fn at(&self, i: usize) -> Option<u8> {
        if i >= self.start_rule_len {
            return None;
        }
        let (mut rule, mut index, mut pos) = self.sample(i / SAMPLING);
        loop {
            let rule_start = pos - self.child_offset(rule, index);
            index = self.find_child(rule, index, i - rule_start);
            pos = rule_start + self.child_offset(rule, index);
            let symbol = self.rules[rule].get_int(index).unwrap();
            if Grammar::is_terminal(symbol) {
                return Some(symbol as u8);
            }
            rule = symbol - RULE_OFFSET;
            index = 0;
        }
    }

    fn substr(&self, i: usize, buf: &mut [u8]) -> usize {
        let n = self.start_rule_len;
        if i >= n || buf.is_empty() {
            return 0;
        }
        let end = n.min(i + buf.len());

        // The per-block walks stay inside their sample's rule, so a request
        // spanning several blocks is split at the block boundaries.
        let mut written = 0;
        let mut seg_start = i;
        while seg_start < end {
            let seg_end = end.min((seg_start / SAMPLING + 1) * SAMPLING);
            written += self.extract_block(seg_start, seg_end, &mut buf[written..]);
            seg_start = seg_end;
        }
        written
    }
}

impl<const SAMPLING: usize> Serializable for SampledScanGrammar<SAMPLING> {
    fn serialize_into<W: Write>(&self, mut writer: W) -> Result<usize> {
        let mut mem = self.rules.serialize_into(&mut writer)?;
        mem += self.start_rule_id.serialize_into(&mut writer)?;
        mem += self.start_rule_len.serialize_into(&mut writer)?;
        mem += self.expansion_lens.serialize_into(&mut writer)?;
        mem += self.child_offsets.serialize_into(&mut writer)?;
        mem += self.sample_rules.serialize_into(&mut writer)?;
        mem += self.sample_children.serialize_into(&mut writer)?;
        mem += self.sample_back_offs.serialize_into(&mut writer)?;
        Ok(mem)
    }

    fn deserialize_from<R: Read>(mut reader: R) -> Result<Self> {
        let rules = Vec::<CompactVector>::deserialize_from(&mut reader)?;
        let start_rule_id = usize::deserialize_from(&mut reader)?;
        let start_rule_len = usize::deserialize_from(&mut reader)?;
        let expansion_lens = CompactVector::deserialize_from(&mut reader)?;
        let child_offsets = Vec::<CompactVector>::deserialize_from(&mut reader)?;
        let sample_rules = CompactVector::deserialize_from(&mut reader)?;
        let sample_children = CompactVector::deserialize_from(&mut reader)?;
        let sample_back_offs = CompactVector::deserialize_from(&mut reader)?;
        Ok(Self {
            rules,
            start_rule_id,
            start_rule_len,
            expansion_lens,
            child_offsets,
            sample_rules,
            sample_children,
            sample_back_offs,
        })
    }

    fn size_in_bytes(&self) -> usize {
        self.rules.size_in_bytes()
            + std::mem::size_of::<usize>() * 2
            + self.expansion_lens.size_in_bytes()
            + self.child_offsets.size_in_bytes()
            + self.sample_rules.size_in_bytes()
            + self.sample_children.size_in_bytes()
            + self.sample_back_offs.size_in_bytes()
    }
}
