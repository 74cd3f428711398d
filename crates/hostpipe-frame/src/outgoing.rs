use std::io::{Read, Write};

use bytes::Bytes;
use hostpipe_stream::{Result, StreamError, StreamRead, StreamWrite};

use crate::HEADER_SIZE;

/// One fully-known outbound message with a monotonically advancing write
/// cursor.
///
/// The cursor covers the derived 4-byte length header and the payload, so a
/// packet can resume emission at any byte position — including mid-header —
/// after an arbitrary sequence of partial writes or a snapshot restore.
#[derive(Debug, Clone)]
pub struct OutgoingPacket {
    payload: Bytes,
    offset: usize,
}

impl OutgoingPacket {
    /// Create a packet for a payload.
    ///
    /// # Panics
    ///
    /// Panics if the payload length does not fit the 32-bit wire header.
    /// Oversized payloads are a caller bug, not a runtime condition.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        assert!(
            payload.len() <= u32::MAX as usize,
            "pipe message payload must fit a 32-bit length header"
        );
        Self { payload, offset: 0 }
    }

    /// Copy bytes starting at the current cursor into `buf`.
    ///
    /// Emits the remaining header bytes first, then the remaining payload
    /// bytes, stopping when `buf` is full or the packet completes. Returns
    /// the number of bytes written; 0 means the buffer had no capacity or
    /// the packet is already complete.
    pub fn write_into(&mut self, buf: &mut [u8]) -> usize {
        let header = (self.payload.len() as u32).to_le_bytes();
        let mut written = 0;

        while self.offset < HEADER_SIZE && written < buf.len() {
            buf[written] = header[self.offset];
            self.offset += 1;
            written += 1;
        }

        if self.offset >= HEADER_SIZE && written < buf.len() {
            let sent = self.offset - HEADER_SIZE;
            let chunk = (self.payload.len() - sent).min(buf.len() - written);
            buf[written..written + chunk].copy_from_slice(&self.payload[sent..sent + chunk]);
            self.offset += chunk;
            written += chunk;
        }

        written
    }

    /// True once every header and payload byte has been emitted.
    pub fn complete(&self) -> bool {
        self.offset == self.wire_size()
    }

    /// Current cursor position in `[0, 4 + payload length]`.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The message payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total bytes this packet puts on the wire (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize cursor and payload into a snapshot stream.
    ///
    /// The header is never stored; it is re-derived from the payload length
    /// on restore.
    pub fn save(&self, stream: &mut dyn Write) -> Result<()> {
        stream.put_be64(self.offset as u64)?;
        stream.put_bytes(&self.payload)
    }

    /// Reconstruct a packet from a snapshot stream.
    pub fn load(stream: &mut dyn Read) -> Result<Self> {
        let offset = stream.get_be64()?;
        let payload = stream.get_bytes()?;

        let offset = usize::try_from(offset)
            .map_err(|_| StreamError::Malformed("outgoing packet cursor out of range"))?;
        if offset > HEADER_SIZE + payload.len() {
            return Err(StreamError::Malformed("outgoing packet cursor past packet end"));
        }

        Ok(Self {
            payload: payload.into(),
            offset,
        })
    }
}
