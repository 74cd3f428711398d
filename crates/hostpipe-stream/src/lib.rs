//! Snapshot byte-stream primitives.
//!
//! Snapshot records in hostpipe are written as big-endian integers and
//! length-prefixed byte strings over plain `std::io` streams. This is the
//! lowest layer of hostpipe; the framer and channel crates build their
//! save/restore records on top of the two extension traits provided here.
//!
//! Note the asymmetry with the wire format: message framing on the guest
//! pipe is little-endian, snapshot streams are big-endian. Both byte orders
//! are fixed external constants and must not drift.

pub mod error;
pub mod read;
pub mod write;

pub use error::{Result, StreamError};
pub use read::StreamRead;
pub use write::StreamWrite;
