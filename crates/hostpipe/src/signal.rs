/// Outward notifications from a channel to the virtual-device layer.
///
/// The device layer implements this against its wake/close machinery and
/// hands one instance to each channel it opens. Channels never call these
/// methods while holding a channel or registry lock, so implementations may
/// call back into the registry (for example, `close` may immediately drive
/// [`crate::HandleRegistry::destroy`]).
pub trait DeviceSignal: Send + Sync {
    /// A packet was queued for the guest; wake it to read.
    fn wake_read(&self);

    /// The host side is done with this channel; tear down the guest end.
    fn close(&self);
}
