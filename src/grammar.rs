//! Straight-line grammar model and its on-disk tuple format.
#![cfg(target_pointer_width = "64")]

pub mod tuple_coder;

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use anyhow::{anyhow, Result};

use crate::int_vectors::CompactVector;
use crate::Serializable;

/// The value by which rule ids are offset in symbol containers.
///
/// The values 0 to 255 encode terminals (raw byte values), while values
/// starting at 256 encode nonterminals: symbol 256 refers to rule 0,
/// 257 to rule 1, et cetera.
pub const RULE_OFFSET: usize = 256;

/// A straight-line grammar deriving exactly one string.
///
/// Rules are indexed by dense ids; each right-hand side is a packed symbol
/// container whose width fits its largest symbol. One rule is the start
/// rule, whose expansion is the derived string.
///
/// # Examples
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use gralz::grammar::{Grammar, RULE_OFFSET};
/// use gralz::int_vectors::CompactVector;
///
/// // R0 -> a b, R1 -> R0 R0
/// let rules = vec![
///     CompactVector::from_slice(&[b'a' as usize, b'b' as usize])?,
///     CompactVector::from_slice(&[RULE_OFFSET, RULE_OFFSET])?,
/// ];
/// let grammar = Grammar::new(rules, 1)?;
///
/// assert_eq!(grammar.rule_count(), 2);
/// assert_eq!(grammar.reproduce()?, b"abab");
/// # Ok(())
/// # }
/// ```
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Grammar {
    rules: Vec<CompactVector>,
    start_rule_id: usize,
}

impl Grammar {
    /// Creates a new grammar from rule containers and the id of the start
    /// rule.
    ///
    /// # Errors
    ///
    /// An error is returned if `start_rule_id` is out of bounds (unless the
    /// grammar is empty) or a symbol references a nonexistent rule.
    pub fn new(rules: Vec<CompactVector>, start_rule_id: usize) -> Result<Self> {
        if !rules.is_empty() && rules.len() <= start_rule_id {
            return Err(anyhow!(
                "start_rule_id must be less than the rule count {}, but got {start_rule_id}.",
                rules.len()
            ));
        }
        for (id, rule) in rules.iter().enumerate() {
            for symbol in rule.iter() {
                if Self::is_non_terminal(symbol) && symbol - RULE_OFFSET >= rules.len() {
                    return Err(anyhow!(
                        "rule {id} references nonexistent rule {}.",
                        symbol - RULE_OFFSET
                    ));
                }
            }
        }
        Ok(Self {
            rules,
            start_rule_id,
        })
    }

    /// Reads a grammar from a tuple-encoded file.
    ///
    /// The start rule is the last rule in the file.
    ///
    /// # Errors
    ///
    /// An error is returned if the file cannot be read or its contents are
    /// not a valid tuple encoding.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    /// Reads a grammar from a tuple-encoded stream.
    ///
    /// # Errors
    ///
    /// See [`Self::from_file()`].
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let rules = tuple_coder::decode(reader)?;
        let start_rule_id = rules.len().saturating_sub(1);
        Ok(Self {
            rules,
            start_rule_id,
        })
    }

    /// Returns the symbol container of the rule with the given id, or
    /// [`None`] if out of bounds.
    #[inline(always)]
    pub fn rule(&self, id: usize) -> Option<&CompactVector> {
        self.rules.get(id)
    }

    /// Returns the slice of all rules.
    pub fn rules(&self) -> &[CompactVector] {
        &self.rules
    }

    /// Returns the id of the start rule.
    #[inline(always)]
    pub const fn start_rule_id(&self) -> usize {
        self.start_rule_id
    }

    /// Returns the number of rules.
    #[inline(always)]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Checks if the grammar has no rules.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns the number of symbols over all right-hand sides.
    pub fn grammar_size(&self) -> usize {
        self.rules.iter().map(|r| r.len()).sum()
    }

    /// Checks whether a symbol encodes a terminal, i.e., a raw byte value.
    #[inline(always)]
    pub const fn is_terminal(symbol: usize) -> bool {
        symbol < RULE_OFFSET
    }

    /// Checks whether a symbol encodes a nonterminal, i.e., a rule id offset
    /// by [`RULE_OFFSET`].
    #[inline(always)]
    pub const fn is_non_terminal(symbol: usize) -> bool {
        !Self::is_terminal(symbol)
    }

    /// Renumbers the rules such that a rule with id `i` only references
    /// rules with ids less than `i`, giving the start rule the largest id.
    ///
    /// Rules unreachable from the start rule derive nothing and are dropped;
    /// the surviving rules are packed into dense ids. Renumbering an already
    /// renumbered grammar leaves it unchanged.
    ///
    /// # Errors
    ///
    /// An error is returned if the derivation graph contains a cycle.
    pub fn dependency_renumber(&mut self) -> Result<()> {
        let n = self.rules.len();
        if n == 0 {
            return Ok(());
        }

        let mut renumbering = vec![usize::MAX; n];
        let mut on_stack = vec![false; n];
        let mut count = 0;

        // Iterative post-order from the start rule; the derivation can be
        // millions deep, so the host stack is off limits.
        let mut stack: Vec<(usize, usize)> = vec![(self.start_rule_id, 0)];
        on_stack[self.start_rule_id] = true;
        while let Some(&(rule_id, cursor)) = stack.last() {
            if cursor == self.rules[rule_id].len() {
                renumbering[rule_id] = count;
                count += 1;
                on_stack[rule_id] = false;
                stack.pop();
                continue;
            }
            let symbol = self.rules[rule_id].get_int(cursor).unwrap();
            stack.last_mut().unwrap().1 += 1;
            if Self::is_non_terminal(symbol) {
                let child = symbol - RULE_OFFSET;
                if on_stack[child] {
                    return Err(anyhow!(
                        "cycle detected: rule {child} participates in its own derivation."
                    ));
                }
                if renumbering[child] == usize::MAX {
                    stack.push((child, 0));
                    on_stack[child] = true;
                }
            }
        }

        let mut new_rules = vec![CompactVector::default(); count];
        for (old_id, rule) in self.rules.iter().enumerate() {
            let new_id = renumbering[old_id];
            if new_id == usize::MAX {
                continue;
            }
            let mapped: Vec<usize> = rule
                .iter()
                .map(|symbol| {
                    if Self::is_terminal(symbol) {
                        symbol
                    } else {
                        renumbering[symbol - RULE_OFFSET] + RULE_OFFSET
                    }
                })
                .collect();
            new_rules[new_id] = CompactVector::from_slice(&mapped)?;
        }

        self.rules = new_rules;
        self.start_rule_id = count - 1;
        Ok(())
    }

    /// Writes the derived string to `writer` by expanding the start rule.
    ///
    /// # Errors
    ///
    /// An error is returned if the derivation graph contains a cycle or
    /// writing fails.
    pub fn write_source<W: Write>(&self, mut writer: W) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let mut on_stack = vec![false; self.rules.len()];
        let mut stack: Vec<(usize, usize)> = vec![(self.start_rule_id, 0)];
        on_stack[self.start_rule_id] = true;
        while let Some(&(rule_id, cursor)) = stack.last() {
            if cursor == self.rules[rule_id].len() {
                on_stack[rule_id] = false;
                stack.pop();
                continue;
            }
            let symbol = self.rules[rule_id].get_int(cursor).unwrap();
            stack.last_mut().unwrap().1 += 1;
            if Self::is_terminal(symbol) {
                writer.write_all(&[symbol as u8])?;
            } else {
                let child = symbol - RULE_OFFSET;
                if on_stack[child] {
                    return Err(anyhow!(
                        "cycle detected: rule {child} participates in its own derivation."
                    ));
                }
                stack.push((child, 0));
                on_stack[child] = true;
            }
        }
        Ok(())
    }

    /// Returns the derived string.
    ///
    /// # Errors
    ///
    /// An error is returned if the derivation graph contains a cycle.
    pub fn reproduce(&self) -> Result<Vec<u8>> {
        let mut out = vec![];
        self.write_source(&mut out)?;
        Ok(out)
    }

    /// Returns the length of the derived string.
    ///
    /// # Errors
    ///
    /// An error is returned if the derivation graph contains a cycle.
    pub fn source_length(&self) -> Result<usize> {
        self.fold_rules(|acc, _| acc + 1, |acc, child| acc + child, |acc| acc)
            .map(|r| r.unwrap_or(0))
    }

    /// Returns the number of rules on the longest path in the derivation
    /// graph.
    ///
    /// # Errors
    ///
    /// An error is returned if the derivation graph contains a cycle.
    pub fn depth(&self) -> Result<usize> {
        self.fold_rules(|acc, _| acc, |acc, child| acc.max(child), |acc| acc + 1)
            .map(|r| r.unwrap_or(0))
    }

    /// Folds a per-rule metric bottom-up from the start rule, memoized over
    /// rules. `on_terminal` and `on_child` combine the accumulator with a
    /// terminal or a child's finished metric; `finish` maps the accumulator
    /// to the rule's metric on completion.
    fn fold_rules<FT, FC, FF>(
        &self,
        on_terminal: FT,
        on_child: FC,
        finish: FF,
    ) -> Result<Option<usize>>
    where
        FT: Fn(usize, usize) -> usize,
        FC: Fn(usize, usize) -> usize,
        FF: Fn(usize) -> usize,
    {
        if self.is_empty() {
            return Ok(None);
        }
        let n = self.rules.len();
        let mut memo = vec![usize::MAX; n];
        let mut on_stack = vec![false; n];
        let mut stack: Vec<(usize, usize, usize)> = vec![(self.start_rule_id, 0, 0)];
        on_stack[self.start_rule_id] = true;
        while let Some(&(rule_id, cursor, acc)) = stack.last() {
            if cursor == self.rules[rule_id].len() {
                memo[rule_id] = finish(acc);
                on_stack[rule_id] = false;
                stack.pop();
                continue;
            }
            let symbol = self.rules[rule_id].get_int(cursor).unwrap();
            if Self::is_terminal(symbol) {
                let top = stack.last_mut().unwrap();
                top.1 += 1;
                top.2 = on_terminal(acc, symbol);
            } else {
                let child = symbol - RULE_OFFSET;
                if on_stack[child] {
                    return Err(anyhow!(
                        "cycle detected: rule {child} participates in its own derivation."
                    ));
                }
                if memo[child] != usize::MAX {
                    let top = stack.last_mut().unwrap();
                    top.1 += 1;
                    top.2 = on_child(acc, memo[child]);
                } else {
                    stack.push((child, 0, 0));
                    on_stack[child] = true;
                }
            }
        }
        Ok(Some(memo[self.start_rule_id]))
    }
}

impl Serializable for Grammar {
    fn serialize_into<W: Write>(&self, mut writer: W) -> Result<usize> {
        let mut mem = self.rules.serialize_into(&mut writer)?;
        mem += self.start_rule_id.serialize_into(&mut writer)?;
        Ok(mem)
    }

    fn deserialize_from<R: Read>(mut reader: R) -> Result<Self> {
        let rules = Vec::<CompactVector>::deserialize_from(&mut reader)?;
        let start_rule_id = usize::deserialize_from(&mut reader)?;
        Ok(Self {
            rules,
            start_rule_id,
        })
    }

    fn size_in_bytes(&self) -> usize {
        self.rules.size_in_bytes() + std::mem::size_of::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(symbols: &[usize]) -> CompactVector {
        CompactVector::from_slice(symbols).unwrap()
    }

    fn nt(id: usize) -> usize {
        id + RULE_OFFSET
    }

    // R0 -> 'a' 'b', R1 -> R0 'c', R2 -> R1 R1; derives "abcabc".
    fn abcabc() -> Grammar {
        Grammar::new(
            vec![
                rule(&[b'a' as usize, b'b' as usize]),
                rule(&[nt(0), b'c' as usize]),
                rule(&[nt(1), nt(1)]),
            ],
            2,
        )
        .unwrap()
    }

    #[test]
    fn test_reproduce() {
        assert_eq!(abcabc().reproduce().unwrap(), b"abcabc");
    }

    #[test]
    fn test_statistics() {
        let g = abcabc();
        assert_eq!(g.source_length().unwrap(), 6);
        assert_eq!(g.grammar_size(), 6);
        assert_eq!(g.rule_count(), 3);
        assert_eq!(g.depth().unwrap(), 3);
    }

    #[test]
    fn test_empty_grammar() {
        let g = Grammar::new(vec![], 0).unwrap();
        assert!(g.is_empty());
        assert_eq!(g.reproduce().unwrap(), b"");
        assert_eq!(g.source_length().unwrap(), 0);
        assert_eq!(g.depth().unwrap(), 0);
    }

    #[test]
    fn test_symbol_predicates() {
        assert!(Grammar::is_terminal(0));
        assert!(Grammar::is_terminal(255));
        assert!(Grammar::is_non_terminal(256));
        assert!(Grammar::is_non_terminal(1000));
    }

    #[test]
    fn test_new_rejects_missing_rule() {
        let e = Grammar::new(vec![rule(&[nt(1)])], 0);
        assert_eq!(
            e.err().map(|x| x.to_string()),
            Some("rule 0 references nonexistent rule 1.".to_string())
        );
    }

    #[test]
    fn test_renumber_orders_dependencies() {
        // Rules deliberately shuffled: R0 -> R2 R1, R1 -> 'b', R2 -> R1 'a'.
        let mut g = Grammar::new(
            vec![
                rule(&[nt(2), nt(1)]),
                rule(&[b'b' as usize]),
                rule(&[nt(1), b'a' as usize]),
            ],
            0,
        )
        .unwrap();
        let before = g.reproduce().unwrap();
        g.dependency_renumber().unwrap();
        assert_eq!(g.reproduce().unwrap(), before);
        assert_eq!(g.start_rule_id(), g.rule_count() - 1);
        for id in 0..g.rule_count() {
            for symbol in g.rule(id).unwrap().iter() {
                if Grammar::is_non_terminal(symbol) {
                    assert!(symbol - RULE_OFFSET < id);
                }
            }
        }
    }

    #[test]
    fn test_renumber_idempotent() {
        let mut g = Grammar::new(
            vec![
                rule(&[nt(2), nt(1)]),
                rule(&[b'b' as usize]),
                rule(&[nt(1), b'a' as usize]),
            ],
            0,
        )
        .unwrap();
        g.dependency_renumber().unwrap();
        let once = g.clone();
        g.dependency_renumber().unwrap();
        assert_eq!(g, once);
    }

    #[test]
    fn test_renumber_drops_unreachable() {
        let mut g = Grammar::new(
            vec![rule(&[b'x' as usize]), rule(&[b'y' as usize])],
            0,
        )
        .unwrap();
        g.dependency_renumber().unwrap();
        assert_eq!(g.rule_count(), 1);
        assert_eq!(g.reproduce().unwrap(), b"x");
    }

    #[test]
    fn test_renumber_detects_cycle() {
        let mut g = Grammar::new(vec![rule(&[nt(1)]), rule(&[nt(0)])], 0).unwrap();
        let e = g.dependency_renumber();
        assert!(e.err().map(|x| x.to_string()).unwrap().contains("cycle detected"));
    }

    #[test]
    fn test_self_cycle() {
        let mut g = Grammar::new(vec![rule(&[nt(0), b'a' as usize])], 0).unwrap();
        assert!(g.dependency_renumber().is_err());
        assert!(g.reproduce().is_err());
        assert!(g.source_length().is_err());
    }

    #[test]
    fn test_deep_derivation_is_stack_safe() {
        // A chain R0 -> 'a', R_i -> R_{i-1}, 100k levels deep.
        let mut rules = vec![rule(&[b'a' as usize])];
        for i in 1..100_000 {
            rules.push(rule(&[nt(i - 1)]));
        }
        let mut g = Grammar::new(rules, 99_999).unwrap();
        assert_eq!(g.depth().unwrap(), 100_000);
        assert_eq!(g.source_length().unwrap(), 1);
        g.dependency_renumber().unwrap();
        assert_eq!(g.reproduce().unwrap(), b"a");
    }

    #[test]
    fn test_serialize() {
        let mut bytes = vec![];
        let g = abcabc();
        let size = g.serialize_into(&mut bytes).unwrap();
        let other = Grammar::deserialize_from(&bytes[..]).unwrap();
        assert_eq!(g, other);
        assert_eq!(size, bytes.len());
        assert_eq!(size, g.size_in_bytes());
    }
}
