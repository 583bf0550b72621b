//! Decoder and encoder for the tuple-encoded grammar file format.
//!
//! The format is, in order: the rule count, the minimum rule length, and the
//! maximum rule length as 32-bit integers; then for each rule its length
//! minus the minimum as a 32-bit integer, followed by one entry per symbol.
//! An entry is a tag bit (set for nonterminals) followed by a 32-bit rule
//! index or an 8-bit character. Everything is MSB-first and the stream ends
//! with the marker described in [`crate::bit_stream`].
#![cfg(target_pointer_width = "64")]

use std::io::{Read, Write};

use anyhow::{anyhow, Result};

use crate::bit_stream::{BitReader, BitWriter};
use crate::grammar::{Grammar, RULE_OFFSET};
use crate::int_vectors::CompactVector;

/// Decodes the rule containers of a tuple-encoded grammar stream.
///
/// Each loaded container is trimmed to the width of its largest symbol.
///
/// # Errors
///
/// An error is returned if
///
/// - reading the stream fails,
/// - the stream ends before all rules are decoded, or
/// - a symbol references a rule outside the encoded rule count.
pub fn decode<R: Read>(reader: R) -> Result<Vec<CompactVector>> {
    let mut br = BitReader::new(reader)?;

    let rule_count = br.read_int::<u32>(32)? as usize;
    let min_rule_len = br.read_int::<u32>(32)? as usize;
    let _max_rule_len = br.read_int::<u32>(32)? as usize;

    let mut rules = Vec::with_capacity(rule_count);
    for i in 0..rule_count {
        if br.eof() {
            return Err(anyhow!(
                "unexpected end of stream before rule {i} of {rule_count}."
            ));
        }
        let rule_len = br.read_int::<u32>(32)? as usize + min_rule_len;
        let mut symbols = Vec::with_capacity(rule_len);
        for _ in 0..rule_len {
            let symbol = if br.read_bit()? == 1 {
                let rule_id = br.read_int::<u32>(32)? as usize;
                if rule_id >= rule_count {
                    return Err(anyhow!(
                        "rule {i} references nonexistent rule {rule_id} (rule count {rule_count})."
                    ));
                }
                rule_id + RULE_OFFSET
            } else {
                br.read_int::<u8>(8)? as usize
            };
            symbols.push(symbol);
        }
        rules.push(CompactVector::from_slice(&symbols)?);
    }
    Ok(rules)
}

/// Encodes a grammar into the tuple format.
///
/// The rules are written in id order, so decoding yields a grammar whose
/// start rule is the last one; callers should renumber before encoding if
/// the start rule is elsewhere.
///
/// # Errors
///
/// An error is returned if writing the stream fails.
pub fn encode<W: Write>(grammar: &Grammar, writer: W) -> Result<()> {
    let mut bw = BitWriter::new(writer);

    bw.write_int(grammar.rule_count() as u32, 32)?;
    let (min_len, max_len) = grammar
        .rules()
        .iter()
        .fold((u32::MAX, 0), |(min, max), rule| {
            (min.min(rule.len() as u32), max.max(rule.len() as u32))
        });
    let min_len = if grammar.is_empty() { 0 } else { min_len };
    bw.write_int(min_len, 32)?;
    bw.write_int(max_len, 32)?;

    for rule in grammar.rules() {
        bw.write_int(rule.len() as u32 - min_len, 32)?;
        for symbol in rule.iter() {
            if Grammar::is_terminal(symbol) {
                bw.write_bit(false)?;
                bw.write_int(symbol as u8, 8)?;
            } else {
                bw.write_bit(true)?;
                bw.write_int((symbol - RULE_OFFSET) as u32, 32)?;
            }
        }
    }

    bw.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(grammar: &Grammar) -> Grammar {
        let mut bytes = vec![];
        encode(grammar, &mut bytes).unwrap();
        Grammar::from_reader(&bytes[..]).unwrap()
    }

    #[test]
    fn test_roundtrip_small() {
        // R0 -> 'a' 'b', R1 -> R0 'c', R2 -> R1 R1
        let grammar = Grammar::new(
            vec![
                CompactVector::from_slice(&[b'a' as usize, b'b' as usize]).unwrap(),
                CompactVector::from_slice(&[RULE_OFFSET, b'c' as usize]).unwrap(),
                CompactVector::from_slice(&[RULE_OFFSET + 1, RULE_OFFSET + 1]).unwrap(),
            ],
            2,
        )
        .unwrap();
        let decoded = roundtrip(&grammar);
        assert_eq!(decoded.rule_count(), 3);
        assert_eq!(decoded.start_rule_id(), 2);
        assert_eq!(decoded.reproduce().unwrap(), b"abcabc");
        for id in 0..3 {
            let expected: Vec<usize> = grammar.rule(id).unwrap().iter().collect();
            let actual: Vec<usize> = decoded.rule(id).unwrap().iter().collect();
            assert_eq!(expected, actual);
        }
    }

    #[test]
    fn test_roundtrip_empty() {
        let grammar = Grammar::new(vec![], 0).unwrap();
        let decoded = roundtrip(&grammar);
        assert!(decoded.is_empty());
        assert_eq!(decoded.reproduce().unwrap(), b"");
    }

    #[test]
    fn test_decode_rejects_bad_rule_index() {
        // A single rule whose only symbol claims to be rule 7.
        let mut bw = BitWriter::new(vec![]);
        bw.write_int(1u32, 32).unwrap(); // rule count
        bw.write_int(1u32, 32).unwrap(); // min len
        bw.write_int(1u32, 32).unwrap(); // max len
        bw.write_int(0u32, 32).unwrap(); // rule len - min
        bw.write_bit(true).unwrap();
        bw.write_int(7u32, 32).unwrap();
        let bytes = bw.finish().unwrap();

        let e = decode(&bytes[..]);
        assert_eq!(
            e.err().map(|x| x.to_string()),
            Some("rule 0 references nonexistent rule 7 (rule count 1).".to_string())
        );
    }

    #[test]
    fn test_decode_rejects_truncation() {
        // Header promises two rules but the stream ends after the header.
        let mut bw = BitWriter::new(vec![]);
        bw.write_int(2u32, 32).unwrap();
        bw.write_int(0u32, 32).unwrap();
        bw.write_int(0u32, 32).unwrap();
        let bytes = bw.finish().unwrap();

        let e = decode(&bytes[..]);
        assert_eq!(
            e.err().map(|x| x.to_string()),
            Some("unexpected end of stream before rule 0 of 2.".to_string())
        );
    }

    #[test]
    fn test_roundtrip_wide_symbols() {
        // 300 single-byte rules chained so rule indices exceed one byte.
        let mut rules = vec![CompactVector::from_slice(&[b'x' as usize]).unwrap()];
        for i in 1..300 {
            rules.push(
                CompactVector::from_slice(&[i - 1 + RULE_OFFSET, b'y' as usize]).unwrap(),
            );
        }
        let grammar = Grammar::new(rules, 299).unwrap();
        let decoded = roundtrip(&grammar);
        assert_eq!(decoded.rule_count(), 300);
        assert_eq!(decoded.reproduce().unwrap(), grammar.reproduce().unwrap());
    }
}
