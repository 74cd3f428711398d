use std::io::Read;

use crate::error::Result;

/// Reads snapshot-stream primitives from any `Read` source.
///
/// The decoding mirror of [`crate::write::StreamWrite`]. A short read
/// surfaces as an `UnexpectedEof` I/O error.
pub trait StreamRead: Read {
    /// Read a single byte.
    fn get_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Read a big-endian 32-bit integer.
    fn get_be32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Read a big-endian 64-bit integer.
    fn get_be64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Read a length-prefixed byte string.
    fn get_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.get_be32()? as usize;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl<R: Read + ?Sized> StreamRead for R {}
