use std::io::{Read, Write};

use bytes::{Bytes, BytesMut};
use hostpipe_stream::{Result, StreamError, StreamRead, StreamWrite};

use crate::HEADER_SIZE;

/// One partially-received inbound message.
///
/// Accumulates the 4-byte little-endian length header low-byte-first, then
/// payload bytes, across any number of `read_from` calls. Never looks ahead
/// past the buffer it is given, so trailing bytes of a following message are
/// left for the caller.
#[derive(Debug, Default)]
pub struct IncomingPacket {
    header_bytes_read: u8,
    message_length: u32,
    payload: BytesMut,
}

impl IncomingPacket {
    /// Create an empty packet awaiting its first header byte.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume bytes from `buf`, first into the header, then into the
    /// payload, up to the declared message length. Returns the number of
    /// bytes consumed.
    pub fn read_from(&mut self, buf: &[u8]) -> usize {
        let mut consumed = 0;

        while (self.header_bytes_read as usize) < HEADER_SIZE && consumed < buf.len() {
            self.message_length |= u32::from(buf[consumed]) << (self.header_bytes_read * 8);
            self.header_bytes_read += 1;
            consumed += 1;
        }

        if self.header_bytes_read as usize == HEADER_SIZE {
            let missing = self.message_length as usize - self.payload.len();
            let chunk = missing.min(buf.len() - consumed);
            self.payload
                .extend_from_slice(&buf[consumed..consumed + chunk]);
            consumed += chunk;
        }

        consumed
    }

    /// True once the header is fully known and the payload is full. A
    /// zero-length message completes as soon as its 4 header bytes arrive.
    pub fn complete(&self) -> bool {
        self.header_bytes_read as usize == HEADER_SIZE
            && self.payload.len() == self.message_length as usize
    }

    /// Header bytes consumed so far, in `[0, 4]`.
    pub fn header_bytes_read(&self) -> u8 {
        self.header_bytes_read
    }

    /// Declared message length; meaningful only once the header completes.
    pub fn message_length(&self) -> u32 {
        self.message_length
    }

    /// Take the reconstructed payload out of a complete packet.
    pub fn into_payload(self) -> Bytes {
        debug_assert!(self.complete());
        self.payload.freeze()
    }

    /// Serialize the mid-assembly state into a snapshot stream.
    pub fn save(&self, stream: &mut dyn Write) -> Result<()> {
        stream.put_byte(self.header_bytes_read)?;
        stream.put_be32(self.message_length)?;
        stream.put_bytes(&self.payload)
    }

    /// Reconstruct a packet from a snapshot stream.
    pub fn load(stream: &mut dyn Read) -> Result<Self> {
        let header_bytes_read = stream.get_byte()?;
        let message_length = stream.get_be32()?;
        let payload = stream.get_bytes()?;

        if header_bytes_read as usize > HEADER_SIZE {
            return Err(StreamError::Malformed("incoming packet header count above 4"));
        }
        if (header_bytes_read as usize) < HEADER_SIZE && !payload.is_empty() {
            return Err(StreamError::Malformed("payload bytes before header completed"));
        }
        if header_bytes_read as usize == HEADER_SIZE && payload.len() > message_length as usize {
            return Err(StreamError::Malformed("payload longer than declared length"));
        }

        Ok(Self {
            header_bytes_read,
            message_length,
            payload: payload.as_slice().into(),
        })
    }
}
