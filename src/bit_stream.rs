//! Bitwise input/output streams with an explicit end-of-stream marker.
//!
//! Bits are laid out MSB-first within each byte. Because a byte stream cannot
//! end mid-byte, the low three bits of the final byte encode how many payload
//! bits that byte carries: a count `f` in `0..=5` shares the byte with its
//! `f` payload bits, while a trailing byte that would need 6 or 7 payload
//! bits is followed by a dedicated marker byte holding just the count.
//! [`BitReader`] consumes this layout and reports [`BitReader::eof()`]
//! precisely at the last payload bit; [`BitWriter`] produces it.
#![cfg(target_pointer_width = "64")]

use std::io::{Read, Write};

use anyhow::{anyhow, Result};

use byteorder::{BigEndian, ReadBytesExt};
use num_traits::{NumCast, PrimInt, Unsigned};

const MSB: u8 = 7;

/// Bitwise reader over a byte-oriented input stream.
///
/// The current byte is buffered together with a one-byte lookahead, which is
/// how the end-of-stream marker is detected before the final byte is
/// consumed. Reads past the end yield zero bits; genuine I/O failures are
/// errors.
///
/// # Examples
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use gralz::bit_stream::BitReader;
///
/// // One full payload byte, then a final byte with 3 payload bits
/// // and the marker 0b011 in its low bits.
/// let bytes: &[u8] = &[0xA5, 0x03];
/// let mut br = BitReader::new(bytes)?;
///
/// assert_eq!(br.read_int::<u8>(8)?, 0xA5);
/// assert!(!br.eof());
/// assert_eq!(br.read_int::<u8>(3)?, 0);
/// assert!(br.eof());
/// # Ok(())
/// # }
/// ```
pub struct BitReader<R> {
    reader: R,
    lookahead: Option<u8>,
    current: u8,
    next: u8,
    is_final: bool,
    final_bits: u8,
    cursor: u8,
    bits_read: u64,
}

impl<R: Read> BitReader<R> {
    /// Creates a new reader over `reader`.
    ///
    /// # Errors
    ///
    /// An error is returned if reading the first bytes fails.
    pub fn new(reader: R) -> Result<Self> {
        let mut this = Self {
            reader,
            lookahead: None,
            current: 0,
            next: 0,
            is_final: false,
            final_bits: 0,
            cursor: 0,
            bits_read: 0,
        };
        match this.take_byte()? {
            Some(b) => {
                this.next = b;
                this.read_next()?;
            }
            None => {
                // An empty stream never carries the trailing marker and is
                // treated as holding no bits at all.
                this.is_final = true;
                this.final_bits = 0;
            }
        }
        Ok(this)
    }

    fn take_byte(&mut self) -> Result<Option<u8>> {
        if let Some(b) = self.lookahead.take() {
            return Ok(Some(b));
        }
        let mut buf = [0u8; 1];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn peek_byte(&mut self) -> Result<Option<u8>> {
        if self.lookahead.is_none() {
            self.lookahead = self.take_byte()?;
        }
        Ok(self.lookahead)
    }

    fn read_next_from_stream(&mut self) -> Result<()> {
        match self.take_byte()? {
            Some(b) => {
                self.next = b;
                if self.peek_byte()?.is_none() {
                    // `b` is the last byte of the stream.
                    self.final_bits = b & 0b111;
                    if self.final_bits >= 6 {
                        // The marker lives in a byte of its own and counts
                        // the payload bits of the byte before it.
                        self.is_final = true;
                        self.next = 0;
                    }
                }
            }
            None => {
                self.is_final = true;
                self.final_bits = self.current & 0b111;
                self.next = 0;
            }
        }
        Ok(())
    }

    fn read_next(&mut self) -> Result<()> {
        self.current = self.next;
        self.cursor = MSB;
        self.read_next_from_stream()
    }

    /// Returns true once all payload bits of the final byte are consumed.
    #[inline(always)]
    pub fn eof(&self) -> bool {
        self.is_final && self.cursor <= MSB - self.final_bits
    }

    /// Reads the next single bit, or 0 at the end of the stream.
    ///
    /// # Errors
    ///
    /// An error is returned if reading the underlying stream fails.
    pub fn read_bit(&mut self) -> Result<u8> {
        if self.eof() {
            return Ok(0);
        }
        let bit = (self.current >> self.cursor) & 1;
        if self.cursor > 0 {
            self.cursor -= 1;
        } else {
            self.read_next()?;
        }
        self.bits_read += 1;
        Ok(bit)
    }

    /// Reads the integer value of the next `width` bits in MSB-first order.
    ///
    /// Whole bytes in the middle of the read are fetched in a single
    /// big-endian chunk. Bits past the end of the stream read as zero.
    ///
    /// # Arguments
    ///
    /// - `width`: Number of bits to read, in `1..=64`.
    ///
    /// # Errors
    ///
    /// An error is returned if `width` is out of range, if reading the
    /// underlying stream fails, or if the value does not fit in `T`.
    pub fn read_int<T>(&mut self, width: usize) -> Result<T>
    where
        T: PrimInt + Unsigned,
    {
        if !(1..=64).contains(&width) {
            return Err(anyhow!("width must be in 1..=64, but got {width}."));
        }

        let left = self.cursor as usize + 1;
        let value: u64 = if self.is_final {
            // At most a handful of valid bits remain; take them one at a
            // time so reads past the end fill with zeros.
            let mut v = 0;
            for _ in 0..width {
                v = (v << 1) | (self.read_bit()? as u64);
            }
            v
        } else if width < left {
            // The read stays inside the current byte.
            let v = ((self.current as u64) >> (left - width)) & ((1 << width) - 1);
            self.cursor -= width as u8;
            self.bits_read += width as u64;
            v
        } else {
            // The read consumes at least the rest of the current byte.
            let mut bits = width - left;
            let mut v = ((self.current as u64) & ((1 << left) - 1)) << bits;
            if bits >= 8 {
                if bits >= 16 {
                    // Fetch the whole middle bytes in one chunk, reusing the
                    // buffered lookahead as its first byte.
                    let n = bits / 8 - 1;
                    bits %= 8;
                    let mut chunk = self.read_chunk_be(n)?;
                    chunk |= (self.next as u64) << (n * 8);
                    v |= chunk << bits;
                    self.read_next_from_stream()?;
                } else {
                    bits -= 8;
                    self.read_next()?;
                    v |= (self.current as u64) << bits;
                }
            }
            self.read_next()?;
            if bits > 0 {
                v |= (self.current as u64) >> (8 - bits);
                self.cursor = MSB - bits as u8;
            }
            self.bits_read += width as u64;
            v
        };
        T::from(value).ok_or_else(|| anyhow!("value {value} does not fit in the requested type."))
    }

    /// Reads `n` raw bytes following the buffered lookahead, big-endian.
    fn read_chunk_be(&mut self, n: usize) -> Result<u64> {
        let mut v = 0;
        let mut rem = n;
        if rem > 0 {
            if let Some(b) = self.lookahead.take() {
                v = b as u64;
                rem -= 1;
            }
        }
        if rem > 0 {
            v = (v << (rem * 8)) | self.reader.read_uint::<BigEndian>(rem)?;
        }
        Ok(v)
    }

    /// Gets the number of bits read so far.
    #[inline(always)]
    pub const fn bits_read(&self) -> u64 {
        self.bits_read
    }
}

/// Bitwise writer producing the stream layout consumed by [`BitReader`].
///
/// [`Self::finish()`] must be called to emit the end-of-stream marker;
/// dropping the writer without it loses the trailing partial byte.
///
/// # Examples
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use gralz::bit_stream::{BitReader, BitWriter};
///
/// let mut bw = BitWriter::new(vec![]);
/// bw.write_int(0b1_0110u8, 5)?;
/// let bytes = bw.finish()?;
///
/// let mut br = BitReader::new(&bytes[..])?;
/// assert_eq!(br.read_int::<u8>(5)?, 0b1_0110);
/// assert!(br.eof());
/// # Ok(())
/// # }
/// ```
pub struct BitWriter<W> {
    writer: W,
    current: u8,
    filled: u8,
    bits_written: u64,
}

impl<W: Write> BitWriter<W> {
    /// Creates a new writer over `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            current: 0,
            filled: 0,
            bits_written: 0,
        }
    }

    /// Writes a single bit.
    ///
    /// # Errors
    ///
    /// An error is returned if writing the underlying stream fails.
    pub fn write_bit(&mut self, bit: bool) -> Result<()> {
        self.current |= (bit as u8) << (MSB - self.filled);
        self.filled += 1;
        self.bits_written += 1;
        if self.filled == 8 {
            self.flush_byte()?;
        }
        Ok(())
    }

    /// Writes the lowest `width` bits of `value` in MSB-first order.
    ///
    /// # Arguments
    ///
    /// - `value`: Integer to write.
    /// - `width`: Number of bits to write, in `1..=64`.
    ///
    /// # Errors
    ///
    /// An error is returned if `width` is out of range or `value` does not
    /// fit in `width` bits.
    pub fn write_int<T>(&mut self, value: T, width: usize) -> Result<()>
    where
        T: PrimInt + Unsigned,
    {
        if !(1..=64).contains(&width) {
            return Err(anyhow!("width must be in 1..=64, but got {width}."));
        }
        let v = <u64 as NumCast>::from(value)
            .ok_or_else(|| anyhow!("value must be castable to u64."))?;
        if width < 64 && v >> width != 0 {
            return Err(anyhow!("value must fit in width={width} bits, but got {v}."));
        }
        for k in (0..width).rev() {
            self.write_bit((v >> k) & 1 == 1)?;
        }
        Ok(())
    }

    /// Appends the end-of-stream marker, flushes, and returns the underlying
    /// writer.
    ///
    /// # Errors
    ///
    /// An error is returned if writing the underlying stream fails.
    pub fn finish(mut self) -> Result<W> {
        let k = self.filled;
        if k == 0 {
            self.writer.write_all(&[0])?;
        } else if k <= 5 {
            self.current |= k;
            self.flush_byte()?;
        } else {
            self.flush_byte()?;
            self.writer.write_all(&[k])?;
        }
        self.writer.flush()?;
        Ok(self.writer)
    }

    fn flush_byte(&mut self) -> Result<()> {
        self.writer.write_all(&[self.current])?;
        self.current = 0;
        self.filled = 0;
        Ok(())
    }

    /// Gets the number of payload bits written so far.
    #[inline(always)]
    pub const fn bits_written(&self) -> u64 {
        self.bits_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaChaRng;

    #[test]
    fn test_empty_stream() {
        let br = BitReader::new(&[][..]).unwrap();
        assert!(br.eof());
    }

    #[test]
    fn test_empty_stream_reads_zero() {
        let mut br = BitReader::new(&[][..]).unwrap();
        assert_eq!(br.read_bit().unwrap(), 0);
        assert_eq!(br.read_int::<u32>(32).unwrap(), 0);
    }

    #[test]
    fn test_marker_in_shared_byte() {
        // 0xA5 then 3 payload bits (000) sharing a byte with the marker 0b011.
        let bytes: &[u8] = &[0xA5, 0x03];
        let mut br = BitReader::new(bytes).unwrap();
        let expected = [1, 0, 1, 0, 0, 1, 0, 1, 0, 0, 0];
        for (i, &e) in expected.iter().enumerate() {
            assert!(!br.eof(), "premature eof before bit {i}");
            assert_eq!(br.read_bit().unwrap(), e, "bit {i}");
        }
        assert!(br.eof());
        assert_eq!(br.bits_read(), 11);
    }

    #[test]
    fn test_marker_in_dedicated_byte() {
        // 7 payload bits need a marker byte of their own.
        let mut bw = BitWriter::new(vec![]);
        bw.write_int(0b101_0101u8, 7).unwrap();
        let bytes = bw.finish().unwrap();
        assert_eq!(bytes, vec![0b1010_1010, 0x07]);

        let mut br = BitReader::new(&bytes[..]).unwrap();
        assert_eq!(br.read_int::<u8>(7).unwrap(), 0b101_0101);
        assert!(br.eof());
    }

    #[test]
    fn test_marker_after_aligned_payload() {
        let mut bw = BitWriter::new(vec![]);
        bw.write_int(0xDEADu16, 16).unwrap();
        let bytes = bw.finish().unwrap();
        assert_eq!(bytes, vec![0xDE, 0xAD, 0x00]);

        let mut br = BitReader::new(&bytes[..]).unwrap();
        assert_eq!(br.read_int::<u16>(16).unwrap(), 0xDEAD);
        assert!(br.eof());
    }

    #[test]
    fn test_chunked_reads() {
        let mut bw = BitWriter::new(vec![]);
        bw.write_int(0b101u8, 3).unwrap();
        bw.write_int(0xDEAD_BEEFu32, 32).unwrap();
        bw.write_int(0x0123_4567_89AB_CDEFu64, 64).unwrap();
        bw.write_int(0b01u8, 2).unwrap();
        let bytes = bw.finish().unwrap();

        let mut br = BitReader::new(&bytes[..]).unwrap();
        assert_eq!(br.read_int::<u8>(3).unwrap(), 0b101);
        assert_eq!(br.read_int::<u32>(32).unwrap(), 0xDEAD_BEEF);
        assert_eq!(br.read_int::<u64>(64).unwrap(), 0x0123_4567_89AB_CDEF);
        assert_eq!(br.read_int::<u8>(2).unwrap(), 0b01);
        assert!(br.eof());
    }

    #[test]
    fn test_width_oob() {
        let mut br = BitReader::new(&[0x00][..]).unwrap();
        let e = br.read_int::<u64>(65);
        assert_eq!(
            e.err().map(|x| x.to_string()),
            Some("width must be in 1..=64, but got 65.".to_string())
        );
    }

    #[test]
    fn test_write_int_unfit() {
        let mut bw = BitWriter::new(vec![]);
        let e = bw.write_int(4u8, 2);
        assert_eq!(
            e.err().map(|x| x.to_string()),
            Some("value must fit in width=2 bits, but got 4.".to_string())
        );
    }

    #[test]
    fn test_roundtrip_random_widths() {
        let mut rng = ChaChaRng::seed_from_u64(114514);
        for trial in 0..50 {
            let mut writes = vec![];
            let mut bw = BitWriter::new(vec![]);
            for _ in 0..200 {
                let w = rng.gen_range(1..=64usize);
                let v: u64 = rng.gen::<u64>() & (u64::MAX >> (64 - w));
                bw.write_int(v, w).unwrap();
                writes.push((w, v));
            }
            let bytes = bw.finish().unwrap();

            let mut br = BitReader::new(&bytes[..]).unwrap();
            for &(w, v) in &writes {
                assert_eq!(br.read_int::<u64>(w).unwrap(), v, "trial {trial}");
            }
            assert!(br.eof(), "trial {trial}");
        }
    }

    #[test]
    fn test_roundtrip_bit_by_bit() {
        let mut rng = ChaChaRng::seed_from_u64(334);
        let bits: Vec<bool> = (0..1000).map(|_| rng.gen_bool(0.5)).collect();
        let mut bw = BitWriter::new(vec![]);
        for &b in &bits {
            bw.write_bit(b).unwrap();
        }
        assert_eq!(bw.bits_written(), 1000);
        let bytes = bw.finish().unwrap();

        let mut br = BitReader::new(&bytes[..]).unwrap();
        for (i, &b) in bits.iter().enumerate() {
            assert!(!br.eof(), "premature eof at bit {i}");
            assert_eq!(br.read_bit().unwrap(), b as u8, "bit {i}");
        }
        assert!(br.eof());
    }

    #[test]
    fn test_mixed_bit_and_int_reads() {
        let mut bw = BitWriter::new(vec![]);
        bw.write_bit(true).unwrap();
        bw.write_int(300u16, 9).unwrap();
        bw.write_bit(false).unwrap();
        bw.write_int(77u8, 7).unwrap();
        let bytes = bw.finish().unwrap();

        let mut br = BitReader::new(&bytes[..]).unwrap();
        assert_eq!(br.read_bit().unwrap(), 1);
        assert_eq!(br.read_int::<u16>(9).unwrap(), 300);
        assert_eq!(br.read_bit().unwrap(), 0);
        assert_eq!(br.read_int::<u8>(7).unwrap(), 77);
        assert!(br.eof());
    }
}
