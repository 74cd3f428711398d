use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hostpipe_stream::{Result, StreamError, StreamRead, StreamWrite};
use tracing::debug;

use crate::channel::Channel;

/// Identifier for one logical channel.
///
/// Unique for the lifetime of one registry generation and numerically stable
/// across snapshot save/restore: the same integer names the same logical
/// channel after reload. Negative values are sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(i32);

impl Handle {
    /// The "no channel" sentinel.
    pub const INVALID: Handle = Handle(-1);

    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// The raw integer, e.g. for embedding in a device addressing scheme.
    pub fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct RegistryInner {
    channels: HashMap<Handle, Arc<Channel>>,
    next_handle: i32,
}

/// Handle-indexed owner of a service's channels.
///
/// One lock guards the map and the allocation counter, held only for map
/// bookkeeping: never across a channel's own processing, a handler call, or
/// a channel destructor. Each channel serializes its own state internally,
/// so operations on distinct handles proceed concurrently.
pub struct HandleRegistry {
    inner: Mutex<RegistryInner>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                channels: HashMap::new(),
                next_handle: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the next handle and insert the channel built for it, in one
    /// lock acquisition. Ownership stays with the registry; the returned
    /// `Arc` is the caller's shared reference.
    pub fn create(&self, make: impl FnOnce(Handle) -> Arc<Channel>) -> Arc<Channel> {
        let mut inner = self.lock();
        let handle = Handle(inner.next_handle);
        inner.next_handle += 1;
        let channel = make(handle);
        inner.channels.insert(handle, channel.clone());
        debug!(%handle, "created pipe channel");
        channel
    }

    /// Find a live channel. `None` means the channel was destroyed or never
    /// existed; callers drop the operation they were attempting.
    pub fn lookup(&self, handle: Handle) -> Option<Arc<Channel>> {
        self.lock().channels.get(&handle).cloned()
    }

    /// Remove and drop a channel. Returns false for an unknown handle.
    ///
    /// The entry is moved out under the registry lock, but the channel is
    /// retired and dropped only after the lock is released: its drop may run
    /// arbitrary handler destructors, which are free to call back into this
    /// registry.
    pub fn destroy(&self, handle: Handle) -> bool {
        let removed = self.lock().channels.remove(&handle);
        match removed {
            Some(channel) => {
                channel.retire();
                debug!(%handle, "destroyed pipe channel");
                true
            }
            None => false,
        }
    }

    /// Insert a channel restored from a snapshot under its original handle.
    pub fn insert_restored(&self, handle: Handle, channel: Arc<Channel>) {
        let mut inner = self.lock();
        // The counter must stay strictly ahead of every live handle.
        inner.next_handle = inner.next_handle.max(handle.0 + 1);
        inner.channels.insert(handle, channel);
    }

    /// Live handles, sorted.
    pub fn handles(&self) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self.lock().channels.keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    pub fn len(&self) -> usize {
        self.lock().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().channels.is_empty()
    }

    /// Persist the allocation counter. Channel records are written
    /// separately, keyed by handle, as the device snapshot walk visits them.
    pub fn save(&self, stream: &mut dyn Write) -> Result<()> {
        stream.put_be32(self.lock().next_handle as u32)
    }

    /// Restore the allocation counter; future allocations resume from it.
    pub fn restore(&self, stream: &mut dyn Read) -> Result<()> {
        let next_handle = i32::try_from(stream.get_be32()?)
            .map_err(|_| StreamError::Malformed("handle counter out of range"))?;
        self.lock().next_handle = next_handle;
        Ok(())
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
