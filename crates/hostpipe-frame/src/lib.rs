//! Restartable length-prefixed packet framing.
//!
//! The guest pipe device hands the host arbitrary fixed-size buffer
//! fragments; a message boundary can fall anywhere, including inside the
//! length header. The two packet types here are pure byte-accounting state
//! machines that absorb or emit those fragments one call at a time:
//!
//! ```text
//! ┌────────────────┬──────────────────┐
//! │ Length (4B LE) │ Payload          │
//! │                │ (Length bytes)   │
//! └────────────────┴──────────────────┘
//! ```
//!
//! The length header is little-endian for wire compatibility with existing
//! guests; it is always derived from the payload length, never stored.
//! Both packet types serialize their mid-transfer state byte-exactly into
//! snapshot streams (big-endian, see `hostpipe-stream`).

pub mod incoming;
pub mod outgoing;

pub use incoming::IncomingPacket;
pub use outgoing::OutgoingPacket;

/// Wire header: payload length, unsigned 32-bit little-endian.
pub const HEADER_SIZE: usize = 4;
