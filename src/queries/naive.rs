//! Grammar accessor that walks the derivation from the start rule on every query.
#![cfg(target_pointer_width = "64")]

use std::io::{Read, Write};
use std::path::Path;

use anyhow::Result;

use crate::grammar::{Grammar, RULE_OFFSET};
use crate::int_vectors::CompactVector;
use crate::queries::RandomAccess;
use crate::{utils, Serializable};

/// Grammar accessor answering queries by a length-guided walk from the start
/// rule.
///
/// The grammar is dependency-renumbered on construction and the expansion
/// length of every rule is computed bottom-up, so a query can skip whole
/// subtrees by comparing accumulated lengths. Worst-case cost is the grammar
/// depth times the rule arity; there is no sampling shortcut.
///
/// # Examples
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use gralz::grammar::{Grammar, RULE_OFFSET};
/// use gralz::int_vectors::CompactVector;
/// use gralz::queries::{NaiveGrammar, RandomAccess};
///
/// // R0 -> 'a' 'b', R1 -> R0 R0; derives "abab".
/// let grammar = Grammar::new(
///     vec![
///         CompactVector::from_slice(&[b'a' as usize, b'b' as usize])?,
///         CompactVector::from_slice(&[RULE_OFFSET, RULE_OFFSET])?,
///     ],
///     1,
/// )?;
/// let accessor = NaiveGrammar::new(grammar)?;
///
/// assert_eq!(accessor.source_length(), 4);
/// assert_eq!(accessor.at(2), Some(b'a'));
///
/// let mut buf = [0; 3];
/// assert_eq!(accessor.substr(1, &mut buf), 3);
/// assert_eq!(&buf, b"bab");
/// # Ok(())
/// # }
/// ```
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct NaiveGrammar {
    rules: Vec<CompactVector>,
    start_rule_id: usize,
    start_rule_len: usize,
    expansion_lens: CompactVector,
}

impl NaiveGrammar {
    /// Creates a new accessor consuming `grammar`.
    ///
    /// # Errors
    ///
    /// An error is returned if the grammar's derivation graph contains a
    /// cycle.
    pub fn new(mut grammar: Grammar) -> Result<Self> {
        grammar.dependency_renumber()?;
        let start_rule_id = grammar.start_rule_id();
        let rules = grammar.rules().to_vec();
        let (start_rule_len, expansion_lens) = compute_expansion_lens(&rules)?;
        Ok(Self {
            rules,
            start_rule_id,
            start_rule_len,
            expansion_lens,
        })
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

    #[inline(always)]
    fn symbol_length(&self, symbol: usize) -> usize {
        if Grammar::is_terminal(symbol) {
            1
        } else {
            self.rule_length(symbol - RULE_OFFSET)
        }
    }
}

/// Computes every rule's expansion length bottom-up over a renumbered
/// grammar, returning the start rule's length separately and the others in a
/// packed array fitted to the largest of them.
pub(crate) fn compute_expansion_lens(rules: &[CompactVector]) -> Result<(usize, CompactVector)> {
    if rules.is_empty() {
        return Ok((0, CompactVector::default()));
    }
    let n = rules.len();
    let mut lens = vec![0usize; n];
    for rule_id in 0..n {
        let mut len = 0;
        for symbol in rules[rule_id].iter() {
            if Grammar::is_terminal(symbol) {
                len += 1;
            } else {
                len += lens[symbol - RULE_OFFSET];
            }
        }
        lens[rule_id] = len;
    }
    let start_rule_len = lens[n - 1];
    let max_len = lens[..n - 1].iter().copied().max().unwrap_or(0);
    let mut packed = CompactVector::with_capacity(n - 1, utils::needed_bits(max_len as u64))?;
    for &len in &lens[..n - 1] {
        packed.push_int(len as u64)?;
    }
    Ok((start_rule_len, packed))
}

impl RandomAccess for NaiveGrammar {
    #[inline(always)]
    fn source_length(&self) -> usize {
        self.start_rule_len
    }

    fn at(&self, i: usize) -> Option<u8> {
        if i >= self.start_rule_len {
            return None;
        }
        let mut rule = self.start_rule_id;
        let mut index = 0;
        let mut i = i;
        loop {
            let symbol = self.rules[rule].get_int(index).unwrap();
            if i == 0 && Grammar::is_terminal(symbol) {
                return Some(symbol as u8);
            }
            let symbol_len = self.symbol_length(symbol);
            if i >= symbol_len {
                i -= symbol_len;
                index += 1;
            } else {
                rule = symbol - RULE_OFFSET;
                index = 0;
            }
        }
    }

    fn substr(&self, i: usize, buf: &mut [u8]) -> usize {
        let n = self.start_rule_len;
        if i >= n || buf.is_empty() {
            return 0;
        }
        let end = n.min(i + buf.len());

        // Depth-first emission with an explicit stack, skipping whole
        // subtrees that end before `i`.
        let mut stack: Vec<(usize, usize)> = vec![];
        let mut rule = self.start_rule_id;
        let mut index = 0;
        let mut pos = 0;
        let mut written = 0;
        loop {
            if index == self.rules[rule].len() {
                let (parent, parent_index) = stack.pop().unwrap();
                rule = parent;
                index = parent_index + 1;
                continue;
            }
            let symbol = self.rules[rule].get_int(index).unwrap();
            let symbol_len = self.symbol_length(symbol);
            if pos + symbol_len <= i {
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

impl Serializable for NaiveGrammar {
    fn serialize_into<W: Write>(&self, mut writer: W) -> Result<usize> {
        let mut mem = self.rules.serialize_into(&mut writer)?;
        mem += self.start_rule_id.serialize_into(&mut writer)?;
        mem += self.start_rule_len.serialize_into(&mut writer)?;
        mem += self.expansion_lens.serialize_into(&mut writer)?;
        Ok(mem)
    }

    fn deserialize_from<R: Read>(mut reader: R) -> Result<Self> {
        let rules = Vec::<CompactVector>::deserialize_from(&mut reader)?;
        let start_rule_id = usize::deserialize_from(&mut reader)?;
        let start_rule_len = usize::deserialize_from(&mut reader)?;
        let expansion_lens = CompactVector::deserialize_from(&mut reader)?;
        Ok(Self {
            rules,
            start_rule_id,
            start_rule_len,
            expansion_lens,
        })
    }

    fn size_in_bytes(&self) -> usize {
        self.rules.size_in_bytes()
            + std::mem::size_of::<usize>() * 2
            + self.expansion_lens.size_in_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::queries::tests::{balanced_grammar, check_accessor};

    #[test]
    fn test_fox_sentence() {
        let text = b"The quick brown fox jumps over the lazy dog";
        let accessor = NaiveGrammar::new(balanced_grammar(text)).unwrap();
        check_accessor(text, &accessor);
    }

    #[test]
    fn test_run_of_as() {
        // R0 -> 'a' 'a', R1 -> R0 R0, R2 -> R1 R1, R3 -> R2 R2, R4 -> R3 R1
        let text = [b'a'; 20];
        let accessor = NaiveGrammar::new(balanced_grammar(&text)).unwrap();
        assert_eq!(accessor.source_length(), 20);
        for i in 0..20 {
            assert_eq!(accessor.at(i), Some(b'a'));
        }
        let mut buf = [0; 7];
        assert_eq!(accessor.substr(3, &mut buf), 7);
        assert_eq!(&buf, b"aaaaaaa");
    }

    #[test]
    fn test_empty_grammar() {
        let accessor = NaiveGrammar::new(Grammar::new(vec![], 0).unwrap()).unwrap();
        assert_eq!(accessor.source_length(), 0);
        assert_eq!(accessor.at(0), None);
        let mut buf = [0; 4];
        assert_eq!(accessor.substr(0, &mut buf), 0);
    }

    #[test]
    fn test_substr_clamps() {
        let text = b"abcdef";
        let accessor = NaiveGrammar::new(balanced_grammar(text)).unwrap();
        let mut buf = [0; 10];
        assert_eq!(accessor.substr(4, &mut buf), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(accessor.substr(6, &mut buf), 0);
    }

    #[test]
    fn test_serialize() {
        let mut bytes = vec![];
        let accessor = NaiveGrammar::new(balanced_grammar(b"mississippi")).unwrap();
        let size = accessor.serialize_into(&mut bytes).unwrap();
        let other = NaiveGrammar::deserialize_from(&bytes[..]).unwrap();
        assert_eq!(accessor, other);
        assert_eq!(size, bytes.len());
        assert_eq!(size, accessor.size_in_bytes());
    }
}
