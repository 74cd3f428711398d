//! Host-side transport core for paravirtual message pipes.
//!
//! An emulated guest talks to host-side logic over a narrow, buffer-oriented
//! duplex channel: the pipe device hands the host arbitrary fragments of
//! guest memory to read from and write into. This crate turns that byte
//! stream into discrete, ordered messages and addresses many independent
//! logical channels by small integer handles that survive snapshot
//! save/restore.
//!
//! # Crate structure
//!
//! - [`hostpipe_frame`] (re-exported as [`frame`]) — restartable packet
//!   framing state machines
//! - [`hostpipe_stream`] (re-exported as [`stream`]) — snapshot stream
//!   primitives
//! - [`channel`] — the per-channel read/write/poll/close protocol
//! - [`registry`] — handle allocation, locked lookup, snapshot persistence
//! - [`service`] — named services tying a registry to per-channel handlers

pub mod channel;
pub mod registry;
pub mod service;
pub mod signal;

pub use channel::{Channel, MessageHandler, PollStatus};
pub use registry::{Handle, HandleRegistry};
pub use service::{HandlerFactory, PipeService, Sender};
pub use signal::DeviceSignal;

/// Re-export framing types.
pub mod frame {
    pub use hostpipe_frame::*;
}

/// Re-export snapshot stream types.
pub mod stream {
    pub use hostpipe_stream::*;
}
