use std::io::Write;

use crate::error::{Result, StreamError};

/// Writes snapshot-stream primitives to any `Write` sink.
///
/// Integers are big-endian; byte strings carry a big-endian `u32` length
/// prefix. Blanket-implemented so `&mut dyn Write` works at call sites.
pub trait StreamWrite: Write {
    /// Write a single byte.
    fn put_byte(&mut self, value: u8) -> Result<()> {
        self.write_all(&[value])?;
        Ok(())
    }

    /// Write a big-endian 32-bit integer.
    fn put_be32(&mut self, value: u32) -> Result<()> {
        self.write_all(&value.to_be_bytes())?;
        Ok(())
    }

    /// Write a big-endian 64-bit integer.
    fn put_be64(&mut self, value: u64) -> Result<()> {
        self.write_all(&value.to_be_bytes())?;
        Ok(())
    }

    /// Write a length-prefixed byte string.
    fn put_bytes(&mut self, value: &[u8]) -> Result<()> {
        let len = u32::try_from(value.len())
            .map_err(|_| StreamError::Malformed("byte string longer than u32::MAX"))?;
        self.put_be32(len)?;
        self.write_all(value)?;
        Ok(())
    }
}

impl<W: Write + ?Sized> StreamWrite for W {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_byte_writes_raw() {
        let mut buf = Vec::new();
        buf.put_byte(0xAB).unwrap();
        assert_eq!(buf, [0xAB]);
    }

    #[test]
    fn put_be32_is_big_endian() {
        let mut buf = Vec::new();
        buf.put_be32(0x0102_0304).unwrap();
        assert_eq!(buf, [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn put_be64_is_big_endian() {
        let mut buf = Vec::new();
        buf.put_be64(0x0102_0304_0506_0708).unwrap();
        assert_eq!(buf, [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn put_bytes_prefixes_length() {
        let mut buf = Vec::new();
        buf.put_bytes(b"abc").unwrap();
        assert_eq!(buf, [0x00, 0x00, 0x00, 0x03, b'a', b'b', b'c']);
    }

    #[test]
    fn put_bytes_empty() {
        let mut buf = Vec::new();
        buf.put_bytes(b"").unwrap();
        assert_eq!(buf, [0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn works_through_dyn_write() {
        let mut buf = Vec::new();
        let sink: &mut dyn Write = &mut buf;
        sink.put_be32(7).unwrap();
        assert_eq!(buf, [0, 0, 0, 7]);
    }
}
