//! Primitive wire types for the persisted data format.
//!
//! All integers are little-endian. Strings are `u16` length-prefixed UTF-8.

use std::io::{Read, Write};

use super::{
    traits::{ReadError, ReadType, WriteError, WriteType},
    vec_builder::VecBuilder,
};

impl<R: Read> ReadType<R> for u8 {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let mut buf = [0u8; 1];
        reader.read_exact(&mut buf)?;
        Ok(buf[0])
    }
}

impl<W: Write> WriteType<W> for u8 {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        writer.write_all(&[*self])?;
        Ok(())
    }
}

impl<R> ReadType<R> for u16
where
    R: Read,
{
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }
}

impl<W> WriteType<W> for u16
where
    W: Write,
{
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        let buf = self.to_le_bytes();
        writer.write_all(&buf)?;
        Ok(())
    }
}

impl<R: Read> ReadType<R> for u32 {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
}

impl<W: Write> WriteType<W> for u32 {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        let buf = self.to_le_bytes();
        writer.write_all(&buf)?;
        Ok(())
    }
}

impl<R: Read> ReadType<R> for i64 {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }
}

impl<W: Write> WriteType<W> for i64 {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        let buf = self.to_le_bytes();
        writer.write_all(&buf)?;
        Ok(())
    }
}

impl<R: Read> ReadType<R> for u64 {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

impl<W: Write> WriteType<W> for u64 {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        let buf = self.to_le_bytes();
        writer.write_all(&buf)?;
        Ok(())
    }
}

// Length-prefixed UTF-8 string.
impl<R: Read> ReadType<R> for String {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let len = u16::read(reader)?;
        let buf = VecBuilder::new(usize::from(len)).read_exact(reader)?;
        let s = String::from_utf8(buf.into()).map_err(|e| ReadError::Malformed(Box::new(e)))?;
        Ok(s)
    }
}

impl<W: Write> WriteType<W> for String {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.as_str().write(writer)
    }
}

impl<W: Write> WriteType<W> for &str {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        let len = u16::try_from(self.len()).map_err(WriteError::Overflow)?;
        len.write(writer)?;
        writer.write_all(self.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;

    use super::super::test_utils::test_roundtrip;
    use super::*;

    test_roundtrip!(u8, test_u8_roundtrip);

    test_roundtrip!(u16, test_u16_roundtrip);

    test_roundtrip!(u32, test_u32_roundtrip);

    test_roundtrip!(i64, test_i64_roundtrip);

    test_roundtrip!(u64, test_u64_roundtrip);

    test_roundtrip!(String, test_string_roundtrip);

    #[test]
    fn test_integers_are_little_endian() {
        let mut buf = vec![];
        0x1234_5678u32.write(&mut buf).unwrap();
        assert_eq!(buf, vec![0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_string_truncated_payload() {
        let mut buf = Cursor::new(Vec::<u8>::new());
        u16::MAX.write(&mut buf).unwrap();
        buf.set_position(0);

        let err = String::read(&mut buf).unwrap_err();
        assert_matches!(err, ReadError::IO(_));
    }

    #[test]
    fn test_string_rejects_invalid_utf8() {
        let mut buf = Cursor::new(Vec::<u8>::new());
        2u16.write(&mut buf).unwrap();
        buf.get_mut().extend_from_slice(&[0xff, 0xfe]);
        buf.set_position(0);

        let err = String::read(&mut buf).unwrap_err();
        assert_matches!(err, ReadError::Malformed(_));
    }

    #[test]
    fn test_string_too_long_to_write() {
        let s = "x".repeat(usize::from(u16::MAX) + 1);
        let err = s.write(&mut Vec::new()).unwrap_err();
        assert_matches!(err, WriteError::Overflow(_));
    }
}
