use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use hostpipe_frame::{IncomingPacket, OutgoingPacket};
use hostpipe_stream::{Result, StreamError, StreamRead, StreamWrite};
use tracing::debug;

use crate::registry::Handle;
use crate::signal::DeviceSignal;

/// Per-message behavior attached to a channel.
///
/// `on_message` runs synchronously on the thread that called
/// [`Channel::read_into`], with no channel lock held, so it may freely call
/// [`Channel::send`], [`Channel::request_close_after_drain`] or
/// [`Channel::close_from_host`] on the same channel, or destroy the channel
/// through the registry.
pub trait MessageHandler: Send + Sync {
    /// Invoked exactly once per fully assembled inbound message.
    fn on_message(&self, channel: &Channel, payload: Bytes);

    /// Persist handler state; written after the channel's framing record.
    fn on_save(&self, _stream: &mut dyn Write) -> Result<()> {
        Ok(())
    }

    /// Restore handler state written by [`MessageHandler::on_save`].
    fn on_load(&self, _stream: &mut dyn Read) -> Result<()> {
        Ok(())
    }
}

/// Channel readiness from the guest's point of view, as the pipe device
/// polls it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollStatus {
    /// The outgoing queue holds bytes the guest should read.
    pub guest_can_read: bool,
    /// The channel will accept inbound bytes (the read gate is open).
    pub guest_can_write: bool,
}

#[derive(Default)]
struct ChannelState {
    incoming: Option<IncomingPacket>,
    outgoing: VecDeque<OutgoingPacket>,
    close_requested: bool,
    close_signaled: bool,
}

impl ChannelState {
    /// Read gate. A partial inbound message must always be finishable, but
    /// once a message has been handled no further inbound bytes are accepted
    /// until any queued response has fully drained. This keeps
    /// request/response pairs strictly ordered on one channel.
    fn allow_read(&self) -> bool {
        if self.close_requested {
            return false;
        }
        if self.incoming.is_some() {
            return true;
        }
        self.outgoing.is_empty()
    }
}

/// One logical duplex message stream between guest and host.
///
/// Owns at most one in-progress [`IncomingPacket`], a FIFO of
/// [`OutgoingPacket`]s and the close-request state. The device dispatch loop
/// drives [`Channel::read_into`] / [`Channel::write_from`] /
/// [`Channel::poll_status`] synchronously; [`Channel::send`] may additionally
/// be called from any thread. All operations are non-blocking: "no progress
/// possible" is a 0-byte return, never an error.
pub struct Channel {
    handle: Handle,
    handler: Box<dyn MessageHandler>,
    signal: Arc<dyn DeviceSignal>,
    state: Mutex<ChannelState>,
}

impl Channel {
    pub(crate) fn new(
        handle: Handle,
        handler: Box<dyn MessageHandler>,
        signal: Arc<dyn DeviceSignal>,
    ) -> Self {
        Self {
            handle,
            handler,
            signal,
            state: Mutex::new(ChannelState::default()),
        }
    }

    /// The registry handle identifying this channel.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    // A poisoned lock only means a handler panicked on another thread; the
    // framing state is consistent between operations either way.
    fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a message for the guest and wake it to read.
    ///
    /// Messages drain in `send` call order. Sends to a channel whose close
    /// has already executed are silently dropped.
    ///
    /// # Panics
    ///
    /// Panics if the payload length does not fit the 32-bit wire header.
    pub fn send(&self, payload: impl Into<Bytes>) {
        let mut state = self.state();
        if state.close_signaled {
            return;
        }
        state.outgoing.push_back(OutgoingPacket::new(payload.into()));
        drop(state);
        self.signal.wake_read();
    }

    /// Feed guest-written buffer fragments into the channel.
    ///
    /// Bytes advance the in-progress inbound packet; each completed message
    /// is handed to the handler before any further bytes are consumed, and
    /// the read gate is re-checked after every message so a handler that
    /// queues a response (or requests close) suppresses further reads within
    /// the same call. Returns the total bytes consumed; 0 means the gate is
    /// closed, try again after the outgoing queue drains.
    pub fn read_into(&self, buffers: &[&[u8]]) -> usize {
        let mut consumed = 0;
        for buffer in buffers {
            let mut pos = 0;
            while pos < buffer.len() {
                let completed = {
                    let mut state = self.state();
                    if !state.allow_read() {
                        return consumed;
                    }
                    let packet = state.incoming.get_or_insert_with(IncomingPacket::new);
                    let n = packet.read_from(&buffer[pos..]);
                    pos += n;
                    consumed += n;
                    if packet.complete() {
                        state.incoming.take().map(IncomingPacket::into_payload)
                    } else {
                        None
                    }
                };
                match completed {
                    Some(payload) => self.handler.on_message(self, payload),
                    None => break,
                }
            }
        }
        consumed
    }

    /// Drain queued outbound packets into guest-readable buffer fragments.
    ///
    /// Fills each buffer from the front of the queue, popping packets as
    /// they complete. Returns the total bytes written; 0 means the queue is
    /// empty. Once the queue empties with a close pending, the close
    /// executes here.
    pub fn write_from(&self, buffers: &mut [&mut [u8]]) -> usize {
        let mut written = 0;
        let mut state = self.state();
        for buffer in buffers.iter_mut() {
            let mut pos = 0;
            while pos < buffer.len() {
                let Some(front) = state.outgoing.front_mut() else {
                    break;
                };
                pos += front.write_into(&mut buffer[pos..]);
                if front.complete() {
                    state.outgoing.pop_front();
                } else {
                    break; // buffer is full
                }
            }
            written += pos;
        }
        let fire_close =
            state.close_requested && !state.close_signaled && state.outgoing.is_empty();
        if fire_close {
            state.close_signaled = true;
        }
        drop(state);
        if fire_close {
            debug!(handle = %self.handle, "pipe drained, closing");
            self.signal.close();
        }
        written
    }

    /// Channel readiness as seen by the polling pipe device.
    pub fn poll_status(&self) -> PollStatus {
        let state = self.state();
        PollStatus {
            guest_can_read: !state.outgoing.is_empty(),
            guest_can_write: state.allow_read(),
        }
    }

    /// Refuse further inbound work and close once the outgoing queue drains.
    ///
    /// With an empty queue the close executes immediately; otherwise it
    /// executes from [`Channel::write_from`] when the last packet finishes.
    pub fn request_close_after_drain(&self) {
        let mut state = self.state();
        state.close_requested = true;
        let fire_close = !state.close_signaled && state.outgoing.is_empty();
        if fire_close {
            state.close_signaled = true;
        }
        drop(state);
        if fire_close {
            debug!(handle = %self.handle, "closing idle pipe");
            self.signal.close();
        }
    }

    /// Close immediately, discarding queued output and any partial inbound
    /// message. A message queued before this call is never delivered to the
    /// guest.
    pub fn close_from_host(&self) {
        let mut state = self.state();
        state.close_requested = true;
        state.incoming = None;
        state.outgoing.clear();
        let fire_close = !state.close_signaled;
        state.close_signaled = true;
        drop(state);
        if fire_close {
            debug!(handle = %self.handle, "closing pipe from host");
            self.signal.close();
        }
    }

    /// The guest closed its end; discard in-flight state and stop accepting
    /// work. The device layer follows up with
    /// [`crate::HandleRegistry::destroy`].
    pub fn on_guest_close(&self) {
        let mut state = self.state();
        state.close_requested = true;
        state.close_signaled = true;
        state.incoming = None;
        state.outgoing.clear();
        debug!(handle = %self.handle, "guest closed pipe");
    }

    /// Stop processing on a channel that was removed from its registry.
    pub(crate) fn retire(&self) {
        let mut state = self.state();
        state.close_requested = true;
        state.close_signaled = true;
    }

    /// Serialize in-flight framing state, then the handler's extra state.
    ///
    /// Record layout: presence flag for the inbound packet and its fields if
    /// set, then a 64-bit outgoing count followed by each packet's cursor
    /// and payload. The 4-byte wire header is always re-derived from the
    /// payload length on restore, never stored.
    pub fn save(&self, stream: &mut dyn Write) -> Result<()> {
        let state = self.state();
        match &state.incoming {
            Some(packet) => {
                stream.put_byte(1)?;
                packet.save(stream)?;
            }
            None => stream.put_byte(0)?,
        }
        stream.put_be64(state.outgoing.len() as u64)?;
        for packet in &state.outgoing {
            packet.save(stream)?;
        }
        drop(state);
        self.handler.on_save(stream)
    }

    /// Reconstruct a channel from a snapshot record written by
    /// [`Channel::save`].
    pub(crate) fn load(
        handle: Handle,
        handler: Box<dyn MessageHandler>,
        signal: Arc<dyn DeviceSignal>,
        stream: &mut dyn Read,
    ) -> Result<Self> {
        let incoming = match stream.get_byte()? {
            0 => None,
            _ => Some(IncomingPacket::load(stream)?),
        };
        let count = stream.get_be64()?;
        let count = usize::try_from(count)
            .map_err(|_| StreamError::Malformed("outgoing packet count out of range"))?;
        let mut outgoing = VecDeque::new();
        for _ in 0..count {
            outgoing.push_back(OutgoingPacket::load(stream)?);
        }

        let channel = Self {
            handle,
            handler,
            signal,
            state: Mutex::new(ChannelState {
                incoming,
                outgoing,
                close_requested: false,
                close_signaled: false,
            }),
        };
        channel.handler.on_load(stream)?;
        Ok(channel)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("handle", &self.handle).finish()
    }
}
