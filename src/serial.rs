//! Persistence of built index structures as byte streams.
#![cfg(target_pointer_width = "64")]

use std::io::{Read, Write};
use std::mem::size_of;

use anyhow::Result;

/// Trait for writing a structure to a byte stream and reading it back.
///
/// Integers are stored little-endian and containers are prefixed with their
/// element count, so a structure that was expensive to build (a decoded
/// grammar, an LZ-End index) can be dumped once and reloaded without
/// re-decoding its compressed input.
///
/// # Examples
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use gralz::{int_vectors::CompactVector, Serializable};
///
/// let cv = CompactVector::from_slice(&[7u64, 334, 1, 2])?;
///
/// let mut bytes = vec![];
/// let size = cv.serialize_into(&mut bytes)?;
/// let other = CompactVector::deserialize_from(&bytes[..])?;
///
/// assert_eq!(cv, other);
/// assert_eq!(size, bytes.len());
/// assert_eq!(size, cv.size_in_bytes());
/// # Ok(())
/// # }
/// ```
pub trait Serializable: Sized {
    /// The serialized size in bytes, if it is the same for every value of
    /// the type. Containers of such types can report their size without
    /// visiting the elements.
    const FIXED_SIZE: Option<usize> = None;

    /// Writes the structure into `writer`, returning the number of bytes
    /// written.
    ///
    /// # Arguments
    ///
    /// - `writer`: [`Write`] variable.
    fn serialize_into<W: Write>(&self, writer: W) -> Result<usize>;

    /// Reads a structure back from `reader`.
    ///
    /// # Arguments
    ///
    /// - `reader`: [`Read`] variable.
    fn deserialize_from<R: Read>(reader: R) -> Result<Self>;

    /// Returns the number of bytes the structure serializes into.
    fn size_in_bytes(&self) -> usize;
}

macro_rules! int_def {
    ($($int:ty),*) => {$(
        impl Serializable for $int {
            const FIXED_SIZE: Option<usize> = Some(size_of::<$int>());

            fn serialize_into<W: Write>(&self, mut writer: W) -> Result<usize> {
                writer.write_all(&self.to_le_bytes())?;
                Ok(size_of::<$int>())
            }

            fn deserialize_from<R: Read>(mut reader: R) -> Result<Self> {
                let mut buf = [0; size_of::<$int>()];
                reader.read_exact(&mut buf)?;
                Ok(<$int>::from_le_bytes(buf))
            }

            fn size_in_bytes(&self) -> usize {
                size_of::<$int>()
            }
        }
    )*};
}

int_def!(u8, u16, u32, u64, usize);

impl Serializable for bool {
    const FIXED_SIZE: Option<usize> = Some(1);

    fn serialize_into<W: Write>(&self, writer: W) -> Result<usize> {
        u8::from(*self).serialize_into(writer)
    }

    fn deserialize_from<R: Read>(reader: R) -> Result<Self> {
        Ok(u8::deserialize_from(reader)? != 0)
    }

    fn size_in_bytes(&self) -> usize {
        1
    }
}

impl<S: Serializable> Serializable for Option<S> {
    fn serialize_into<W: Write>(&self, mut writer: W) -> Result<usize> {
        match self {
            Some(x) => Ok(true.serialize_into(&mut writer)? + x.serialize_into(writer)?),
            None => false.serialize_into(writer),
        }
    }

    fn deserialize_from<R: Read>(mut reader: R) -> Result<Self> {
        if bool::deserialize_from(&mut reader)? {
            Ok(Some(S::deserialize_from(reader)?))
        } else {
            Ok(None)
        }
    }

    fn size_in_bytes(&self) -> usize {
        1 + self.as_ref().map_or(0, Serializable::size_in_bytes)
    }
}

impl<S: Serializable> Serializable for Vec<S> {
    fn serialize_into<W: Write>(&self, mut writer: W) -> Result<usize> {
        let mut mem = self.len().serialize_into(&mut writer)?;
        for x in self {
            mem += x.serialize_into(&mut writer)?;
        }
        Ok(mem)
    }

    fn deserialize_from<R: Read>(mut reader: R) -> Result<Self> {
        let len = usize::deserialize_from(&mut reader)?;
        (0..len).map(|_| S::deserialize_from(&mut reader)).collect()
    }

    fn size_in_bytes(&self) -> usize {
        let body = match S::FIXED_SIZE {
            Some(m) => m * self.len(),
            None => self.iter().map(Serializable::size_in_bytes).sum(),
        };
        size_of::<usize>() + body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_ints() {
        let mut bytes = vec![];
        let mut size = 0xAAu8.serialize_into(&mut bytes).unwrap();
        size += 0xDEAD_BEEFu32.serialize_into(&mut bytes).unwrap();
        size += usize::MAX.serialize_into(&mut bytes).unwrap();
        assert_eq!(size, bytes.len());

        let mut reader = &bytes[..];
        assert_eq!(u8::deserialize_from(&mut reader).unwrap(), 0xAA);
        assert_eq!(u32::deserialize_from(&mut reader).unwrap(), 0xDEAD_BEEF);
        assert_eq!(usize::deserialize_from(&mut reader).unwrap(), usize::MAX);
    }

    #[test]
    fn test_roundtrip_bool() {
        let mut bytes = vec![];
        true.serialize_into(&mut bytes).unwrap();
        false.serialize_into(&mut bytes).unwrap();
        assert_eq!(bytes, vec![1, 0]);
        assert!(bool::deserialize_from(&bytes[..1]).unwrap());
        assert!(!bool::deserialize_from(&bytes[1..]).unwrap());
    }

    #[test]
    fn test_roundtrip_option() {
        let some = Some(334u64);
        let none: Option<u64> = None;
        let mut bytes = vec![];
        let size = some.serialize_into(&mut bytes).unwrap() + none.serialize_into(&mut bytes).unwrap();
        assert_eq!(size, bytes.len());
        assert_eq!(size, some.size_in_bytes() + none.size_in_bytes());

        let mut reader = &bytes[..];
        assert_eq!(Option::<u64>::deserialize_from(&mut reader).unwrap(), some);
        assert_eq!(Option::<u64>::deserialize_from(&mut reader).unwrap(), none);
    }

    #[test]
    fn test_roundtrip_vec() {
        let vals = vec![7u32, 334, 1, 2];
        let mut bytes = vec![];
        let size = vals.serialize_into(&mut bytes).unwrap();
        assert_eq!(size, bytes.len());
        // Length prefix plus four fixed-size elements.
        assert_eq!(size, size_of::<usize>() + 4 * size_of::<u32>());
        assert_eq!(size, vals.size_in_bytes());
        assert_eq!(Vec::<u32>::deserialize_from(&bytes[..]).unwrap(), vals);
    }

    #[test]
    fn test_vec_of_variable_size() {
        let vals = vec![vec![1u8, 2], vec![], vec![3]];
        let mut bytes = vec![];
        let size = vals.serialize_into(&mut bytes).unwrap();
        assert_eq!(size, bytes.len());
        assert_eq!(size, vals.size_in_bytes());
        assert_eq!(Vec::<Vec<u8>>::deserialize_from(&bytes[..]).unwrap(), vals);
    }
}
