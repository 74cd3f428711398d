use std::io::{Read, Write};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use hostpipe_stream::{Result, StreamError};
use tracing::{debug, info};

use crate::channel::{Channel, MessageHandler};
use crate::registry::{Handle, HandleRegistry};
use crate::signal::DeviceSignal;

/// Builds the message handler for each newly opened or restored channel.
///
/// The factory receives a [`Sender`] for the channel being built, which the
/// handler may clone into worker threads or deferred callbacks for
/// out-of-band responses.
pub type HandlerFactory = Box<dyn Fn(Sender) -> Box<dyn MessageHandler> + Send + Sync>;

/// One named logical service: a handle registry plus the handler factory
/// that gives its channels their behavior.
///
/// The virtual-device layer resolves a guest `connect` to a service by name
/// and calls [`PipeService::open`]; during a snapshot walk it drives
/// [`PipeService::save`]/[`PipeService::restore`] for the counter record and
/// the per-channel hooks for each channel it visits.
pub struct PipeService {
    name: String,
    registry: Arc<HandleRegistry>,
    factory: HandlerFactory,
}

impl PipeService {
    pub fn new(name: impl Into<String>, factory: HandlerFactory) -> Self {
        Self {
            name: name.into(),
            registry: Arc::new(HandleRegistry::new()),
            factory,
        }
    }

    /// Service whose channels run a plain closure per message, with no extra
    /// snapshot state.
    pub fn with_on_message<F>(name: impl Into<String>, on_message: F) -> Self
    where
        F: Fn(&Channel, Bytes) + Clone + Send + Sync + 'static,
    {
        Self::new(
            name,
            Box::new(move |_sender| Box::new(FnHandler(on_message.clone()))),
        )
    }

    /// Service name, as addressed by guest connects.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    /// Open a channel for a guest connect.
    pub fn open(&self, signal: Arc<dyn DeviceSignal>) -> Arc<Channel> {
        let channel = self.registry.create(|handle| {
            let handler = (self.factory)(self.sender(handle));
            Arc::new(Channel::new(handle, handler, signal))
        });
        debug!(service = %self.name, handle = %channel.handle(), "guest opened pipe");
        channel
    }

    /// Find a live channel of this service.
    pub fn lookup(&self, handle: Handle) -> Option<Arc<Channel>> {
        self.registry.lookup(handle)
    }

    /// Destroy a channel. Returns false for an unknown handle.
    pub fn destroy(&self, handle: Handle) -> bool {
        self.registry.destroy(handle)
    }

    /// A send capability for a channel of this service. Valid to hold (and
    /// call) after the channel is gone; sends then turn into no-ops.
    pub fn sender(&self, handle: Handle) -> Sender {
        Sender {
            registry: Arc::downgrade(&self.registry),
            handle,
        }
    }

    /// Persist the service-level record (the handle counter).
    pub fn save(&self, stream: &mut dyn Write) -> Result<()> {
        self.registry.save(stream)
    }

    /// Restore the service-level record.
    pub fn restore(&self, stream: &mut dyn Read) -> Result<()> {
        self.registry.restore(stream)
    }

    /// Per-channel snapshot hook: write one channel's record.
    pub fn save_channel(&self, handle: Handle, stream: &mut dyn Write) -> Result<()> {
        match self.registry.lookup(handle) {
            Some(channel) => channel.save(stream),
            None => Err(StreamError::Malformed("no channel for saved handle")),
        }
    }

    /// Per-channel snapshot hook: rebuild one channel under its original
    /// handle from a stream positioned at its record.
    pub fn restore_channel(
        &self,
        handle: Handle,
        stream: &mut dyn Read,
        signal: Arc<dyn DeviceSignal>,
    ) -> Result<Arc<Channel>> {
        let handler = (self.factory)(self.sender(handle));
        let channel = Arc::new(Channel::load(handle, handler, signal, stream)?);
        self.registry.insert_restored(handle, channel.clone());
        info!(service = %self.name, %handle, "restored pipe channel");
        Ok(channel)
    }
}

struct FnHandler<F>(F);

impl<F: Fn(&Channel, Bytes) + Send + Sync> MessageHandler for FnHandler<F> {
    fn on_message(&self, channel: &Channel, payload: Bytes) {
        (self.0)(channel, payload)
    }
}

/// Cloneable, thread-safe send capability for one channel.
///
/// Re-resolves the channel through the registry on every call, so a stale
/// sender held by a worker thread or a deferred callback degrades to a
/// silent no-op once the channel is destroyed, instead of touching freed
/// state.
#[derive(Clone)]
pub struct Sender {
    registry: Weak<HandleRegistry>,
    handle: Handle,
}

impl Sender {
    /// Queue a message on the channel, if it still exists. Returns whether
    /// the message was accepted.
    pub fn send(&self, payload: impl Into<Bytes>) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        match registry.lookup(self.handle) {
            Some(channel) => {
                channel.send(payload);
                true
            }
            None => {
                debug!(handle = %self.handle, "dropping send to closed pipe channel");
                false
            }
        }
    }

    /// The handle this sender targets.
    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender").field("handle", &self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    struct NullSignal;

    impl DeviceSignal for NullSignal {
        fn wake_read(&self) {}
        fn close(&self) {}
    }

    fn wire_for(payload: &[u8]) -> Vec<u8> {
        let mut wire = (payload.len() as u32).to_le_bytes().to_vec();
        wire.extend_from_slice(payload);
        wire
    }

    fn drain_all(channel: &Channel) -> Vec<u8> {
        let mut wire = Vec::new();
        loop {
            let mut chunk = [0u8; 8];
            let n = channel.write_from(&mut [&mut chunk[..]]);
            if n == 0 {
                break;
            }
            wire.extend_from_slice(&chunk[..n]);
        }
        wire
    }

    #[test]
    fn echo_service_roundtrip() {
        let service = PipeService::with_on_message("echo", |channel: &Channel, payload: Bytes| {
            channel.send(payload);
        });
        let channel = service.open(Arc::new(NullSignal));

        assert_eq!(channel.read_into(&[&wire_for(b"hello")]), 9);
        assert_eq!(drain_all(&channel), wire_for(b"hello"));
    }

    #[test]
    fn out_of_band_send_through_sender() {
        let pending: Arc<Mutex<Vec<Sender>>> = Arc::new(Mutex::new(Vec::new()));
        let queue = pending.clone();
        let service = PipeService::new(
            "oob",
            Box::new(move |sender| {
                let queue = queue.clone();
                Box::new(FnHandler(move |_: &Channel, _: Bytes| {
                    queue.lock().unwrap().push(sender.clone());
                }))
            }),
        );
        let channel = service.open(Arc::new(NullSignal));

        channel.read_into(&[&wire_for(&[1, 2, 3])]);
        assert!(drain_all(&channel).is_empty());

        let sender = pending.lock().unwrap().pop().unwrap();
        assert!(sender.send(&[5u8, 6, 7][..]));
        assert_eq!(drain_all(&channel), wire_for(&[5, 6, 7]));
    }

    #[test]
    fn sender_after_destroy_is_a_noop() {
        let service = PipeService::with_on_message("afterlife", |_: &Channel, _: Bytes| {});
        let channel = service.open(Arc::new(NullSignal));
        let sender = service.sender(channel.handle());

        assert!(service.destroy(channel.handle()));
        assert!(!sender.send(&b"too late"[..]));
    }

    #[test]
    fn sender_from_worker_thread() {
        let service = PipeService::with_on_message("worker", |_: &Channel, _: Bytes| {});
        let channel = service.open(Arc::new(NullSignal));
        let sender = service.sender(channel.handle());

        let worker = std::thread::spawn(move || sender.send(&b"async"[..]));
        assert!(worker.join().unwrap());
        assert_eq!(drain_all(&channel), wire_for(b"async"));
    }

    #[test]
    fn counter_survives_service_snapshot() {
        let service = PipeService::with_on_message("svc", |_: &Channel, _: Bytes| {});
        service.open(Arc::new(NullSignal));
        service.open(Arc::new(NullSignal));

        let mut record = Vec::new();
        service.save(&mut record).unwrap();

        let reloaded = PipeService::with_on_message("svc", |_: &Channel, _: Bytes| {});
        reloaded
            .restore(&mut std::io::Cursor::new(record))
            .unwrap();
        assert_eq!(
            reloaded.open(Arc::new(NullSignal)).handle(),
            Handle::new(2)
        );
    }

    #[test]
    fn channel_snapshot_roundtrips_through_service() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let service = PipeService::with_on_message("snap", move |channel: &Channel, _: Bytes| {
            seen.fetch_add(1, Ordering::SeqCst);
            channel.send(&[5u8, 6, 7][..]);
        });

        let channel = service.open(Arc::new(NullSignal));
        channel.read_into(&[&wire_for(&[1, 2, 3])]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let handle = channel.handle();
        let mut record = Vec::new();
        service.save_channel(handle, &mut record).unwrap();
        service.destroy(handle);
        drop(channel);

        let restored = service
            .restore_channel(handle, &mut std::io::Cursor::new(record), Arc::new(NullSignal))
            .unwrap();
        assert_eq!(restored.handle(), handle);
        assert!(service.lookup(handle).is_some());
        assert_eq!(drain_all(&restored), wire_for(&[5, 6, 7]));
    }

    #[test]
    fn save_channel_for_unknown_handle_fails() {
        let service = PipeService::with_on_message("missing", |_: &Channel, _: Bytes| {});
        let mut record = Vec::new();
        let err = service
            .save_channel(Handle::new(42), &mut record)
            .unwrap_err();
        assert!(matches!(err, StreamError::Malformed(_)));
    }
}
