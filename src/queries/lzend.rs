//! Random access over an LZ-End parse through a succinct phrase index.
#![cfg(target_pointer_width = "64")]

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use anyhow::{anyhow, Result};

use crate::bit_stream::BitReader;
use crate::bit_vectors::{Rank, SdVector, SdVectorBuilder, Select};
use crate::permutation::Permutation;
use crate::queries::RandomAccess;
use crate::Serializable;

/// One phrase of an LZ-End parse.
///
/// A phrase of length `len` copies `len - 1` characters from a source ending
/// at the end of phrase `link`, then appends `last`. Phrases of length 1
/// carry no back-reference and their `link` is meaningless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phrase {
    /// The last character of the phrase.
    pub last: u8,
    /// The index of the phrase at whose end the source ends (zero-based).
    pub link: usize,
    /// The phrase length, at least 1.
    pub len: usize,
}

/// Decodes an LZ-End parse stream into its phrases and the derived text
/// length.
///
/// The stream starts with two bytes holding `char_width - 1` and
/// `int_width - 1`, followed by six padding bytes; the body is a
/// concatenation of `(last, link, len)` triples where `last` takes
/// `char_width` bits MSB-first and `link`/`len` take `int_width` bits each
/// in little-endian byte order.
///
/// # Errors
///
/// An error is returned if
///
/// - reading the stream fails,
/// - `char_width` is not in `1..=8`,
/// - `int_width` is not a positive multiple of 8 at most 64, or
/// - a triple has zero length or links at or past its own phrase.
pub fn decode<R: Read>(reader: R) -> Result<(Vec<Phrase>, usize)> {
    let mut br = BitReader::new(reader)?;

    let char_width = br.read_int::<u8>(8)? as usize + 1;
    let int_width = br.read_int::<u8>(8)? as usize + 1;
    if char_width > 8 {
        return Err(anyhow!("char width must be in 1..=8, but got {char_width}."));
    }
    if int_width % 8 != 0 || int_width > 64 {
        return Err(anyhow!(
            "int width must be a positive multiple of 8 at most 64, but got {int_width}."
        ));
    }
    let int_bytes = int_width / 8;
    br.read_int::<u64>(48)?; // header padding

    let mut parsing = vec![];
    let mut source_len = 0;
    while !br.eof() {
        let last = br.read_int::<u8>(char_width)?;
        let mut link = 0;
        for b in 0..int_bytes {
            link |= (br.read_int::<u8>(8)? as usize) << (8 * b);
        }
        let mut len = 0;
        for b in 0..int_bytes {
            len |= (br.read_int::<u8>(8)? as usize) << (8 * b);
        }

        if len == 0 {
            return Err(anyhow!(
                "phrase {} has zero length; the stream is malformed or truncated.",
                parsing.len()
            ));
        }
        let link = if len > 1 {
            if link >= parsing.len() {
                return Err(anyhow!(
                    "phrase {} links to phrase {link}, which is not an earlier phrase.",
                    parsing.len()
                ));
            }
            link
        } else {
            0
        };
        source_len += len;
        parsing.push(Phrase { last, link, len });
    }
    Ok((parsing, source_len))
}

/// Random access over an LZ-End parse.
///
/// Built once from a parse of `k` phrases over a text of length `n`, the
/// index keeps
///
/// - `last`, the final character of every phrase;
/// - `last_pos`, a sparse bit vector marking phrase-end text positions;
/// - `source_begin`, a sparse bit vector with one set bit per source in
///   text order of the source start (phrases without a source grouped at
///   the front), each position's group terminated by an unset bit;
/// - `source_map`, the permutation from phrase id to the rank of its
///   source's set bit in `source_begin`.
///
/// A query jumps from a position to the same offset inside its phrase's
/// source until it lands on a phrase end, whose character is stored
/// directly. Every jump moves strictly left, so termination is guaranteed.
///
/// # Examples
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use gralz::queries::lzend::{LzEnd, Phrase};
/// use gralz::queries::RandomAccess;
///
/// // "abaabb" parses into a | b | aa | bb.
/// let parsing = vec![
///     Phrase { last: b'a', link: 0, len: 1 },
///     Phrase { last: b'b', link: 0, len: 1 },
///     Phrase { last: b'a', link: 0, len: 2 },
///     Phrase { last: b'b', link: 1, len: 2 },
/// ];
/// let accessor = LzEnd::from_parsing(&parsing, 6)?;
///
/// assert_eq!(accessor.at(5), Some(b'b'));
///
/// let mut buf = [0; 4];
/// assert_eq!(accessor.substr(1, &mut buf), 4);
/// assert_eq!(&buf, b"baab");
/// # Ok(())
/// # }
/// ```
///
/// # References
///
///  - S. Kreft, and G. Navarro, "Self-Index Based on LZ77,"
///    In CPM, 2011.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct LzEnd {
    last: Vec<u8>,
    last_pos: SdVector,
    source_begin: SdVector,
    source_map: Permutation,
    source_len: usize,
}

impl LzEnd {
    /// Loads an LZ-End parse file and builds the accessor over it.
    ///
    /// # Errors
    ///
    /// An error is returned if the file cannot be read or decoded, or the
    /// parse violates the LZ-End invariants.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    /// Decodes an LZ-End parse stream and builds the accessor over it.
    ///
    /// # Errors
    ///
    /// See [`Self::from_file()`].
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let (parsing, source_len) = decode(reader)?;
        Self::from_parsing(&parsing, source_len)
    }

    /// Builds the accessor from a parse known to span `source_len`
    /// characters.
    ///
    /// # Errors
    ///
    /// An error is returned if the phrase lengths do not sum to
    /// `source_len`, a phrase links at or past itself, or a source does not
    /// lie entirely left of its phrase.
    pub fn from_parsing(parsing: &[Phrase], source_len: usize) -> Result<Self> {
        let k = parsing.len();
        let n = source_len;

        let total: usize = parsing.iter().map(|f| f.len).sum();
        if total != n {
            return Err(anyhow!(
                "phrase lengths sum to {total}, but the source length is {n}."
            ));
        }

        // Phrase-end positions.
        let mut builder = SdVectorBuilder::new(n, k)?;
        let mut end = 0;
        for (p, f) in parsing.iter().enumerate() {
            if f.len == 0 {
                return Err(anyhow!("phrase {p} has zero length."));
            }
            end += f.len;
            builder.push(end - 1)?;
        }
        let last_pos = builder.build().enable_rank();
        let last: Vec<u8> = parsing.iter().map(|f| f.last).collect();

        // Source starts, shifted by one so that phrases without a source
        // sort before every real text position.
        let mut shifted = vec![0; k];
        let mut start_of = 0;
        for (p, f) in parsing.iter().enumerate() {
            if f.len > 1 {
                if f.link >= p {
                    return Err(anyhow!(
                        "phrase {p} links to phrase {}, which is not an earlier phrase.",
                        f.link
                    ));
                }
                let src_end = last_pos.select1(f.link).unwrap();
                if src_end + 2 < f.len {
                    return Err(anyhow!(
                        "the source of phrase {p} extends past the start of the text."
                    ));
                }
                if src_end >= start_of {
                    return Err(anyhow!(
                        "the source of phrase {p} does not lie left of the phrase."
                    ));
                }
                shifted[p] = src_end + 2 - f.len + 1;
            }
            start_of += f.len;
        }

        let mut order: Vec<usize> = (0..k).collect();
        order.sort_by_key(|&p| shifted[p]);

        // The j-th source in text order owns the j-th set bit of
        // `source_begin`; its position is the shifted start plus the set
        // bits already placed.
        let mut sb = SdVectorBuilder::new(n + k, k)?;
        for (j, &p) in order.iter().enumerate() {
            sb.push(shifted[p] + j)?;
        }
        let source_begin = sb.build().enable_rank();

        let mut ranks = vec![0; k];
        for (j, &p) in order.iter().enumerate() {
            ranks[p] = j;
        }
        let source_map = Permutation::from_slice(&ranks)?;

        Ok(Self {
            last,
            last_pos,
            source_begin,
            source_map,
            source_len,
        })
    }

    /// Returns the number of phrases in the parse.
    #[inline(always)]
    pub fn num_phrases(&self) -> usize {
        self.last.len()
    }

    #[inline(always)]
    fn phrase_start(&self, p: usize) -> usize {
        if p > 0 {
            self.last_pos.select1(p - 1).unwrap() + 1
        } else {
            0
        }
    }

    /// Returns the text position at which the source of phrase `p` starts.
    /// Must not be called for phrases without a source.
    #[inline(always)]
    fn source_start(&self, p: usize) -> usize {
        let rank = self.source_map.next(p).unwrap();
        self.source_begin.select1(rank).unwrap() - rank - 1
    }
}

impl RandomAccess for LzEnd {
    #[inline(always)]
    fn source_length(&self) -> usize {
        self.source_len
    }

    fn at(&self, i: usize) -> Option<u8> {
        if i >= self.source_len {
            return None;
        }
        let mut i = i;
        let mut p = self.last_pos.rank1(i).unwrap();
        loop {
            if self.last_pos.select1(p).unwrap() == i {
                return Some(self.last[p]);
            }
            // Jump to the same offset inside the source; the target is
            // strictly left of `i`.
            i = self.source_start(p) + (i - self.phrase_start(p));
            p = self.last_pos.rank1(i).unwrap();
        }
    }

    fn substr(&self, i: usize, buf: &mut [u8]) -> usize {
        let n = self.source_len;
        if i >= n || buf.is_empty() {
            return 0;
        }
        let len = buf.len().min(n - i);

        enum Job {
            Extract { start: usize, len: usize },
            Emit(u8),
        }

        // The extraction is a pre-order over phrase sources; jobs are pushed
        // right to left so characters pop in text order. Each extraction
        // range maps strictly left of itself, which bounds the stack by the
        // reference depth of the parse.
        let mut jobs = vec![Job::Extract { start: i, len }];
        let mut written = 0;
        while let Some(job) = jobs.pop() {
            match job {
                Job::Emit(c) => {
                    buf[written] = c;
                    written += 1;
                }
                Job::Extract { start, len } => {
                    let end_incl = start + len - 1;
                    let first = self.last_pos.rank1(start).unwrap();
                    let last_ph = self.last_pos.rank1(end_incl).unwrap();
                    for p in (first..=last_ph).rev() {
                        let phrase_start = self.phrase_start(p);
                        let phrase_end = self.last_pos.select1(p).unwrap();
                        let seg_start = start.max(phrase_start);
                        let seg_end_incl = end_incl.min(phrase_end);
                        let seg_len = seg_end_incl - seg_start + 1;
                        if seg_end_incl == phrase_end {
                            jobs.push(Job::Emit(self.last[p]));
                            if seg_len > 1 {
                                jobs.push(Job::Extract {
                                    start: self.source_start(p) + (seg_start - phrase_start),
                                    len: seg_len - 1,
                                });
                            }
                        } else {
                            jobs.push(Job::Extract {
                                start: self.source_start(p) + (seg_start - phrase_start),
                                len: seg_len,
                            });
                        }
                    }
                }
            }
        }
        written
    }
}

impl Serializable for LzEnd {
    fn serialize_into<W: Write>(&self, mut writer: W) -> Result<usize> {
        let mut mem = self.last.serialize_into(&mut writer)?;
        mem += self.last_pos.serialize_into(&mut writer)?;
        mem += self.source_begin.serialize_into(&mut writer)?;
        mem += self.source_map.serialize_into(&mut writer)?;
        mem += self.source_len.serialize_into(&mut writer)?;
        Ok(mem)
    }

    fn deserialize_from<R: Read>(mut reader: R) -> Result<Self> {
        let last = Vec::<u8>::deserialize_from(&mut reader)?;
        let last_pos = SdVector::deserialize_from(&mut reader)?;
        let source_begin = SdVector::deserialize_from(&mut reader)?;
        let source_map = Permutation::deserialize_from(&mut reader)?;
        let source_len = usize::deserialize_from(&mut reader)?;
        Ok(Self {
            last,
            last_pos,
            source_begin,
            source_map,
            source_len,
        })
    }

    fn size_in_bytes(&self) -> usize {
        self.last.size_in_bytes()
            + self.last_pos.size_in_bytes()
            + self.source_begin.size_in_bytes()
            + self.source_map.size_in_bytes()
            + std::mem::size_of::<usize>()
    }
}
