//! Device abstraction.
//!
//! The block pool needs only a handful of buffer commands from the GPU, all executed on a single
//! in-order queue. [`WgpuDevice`] drives real hardware; [`SoftDevice`] is a deterministic
//! in-process device used by tests and by `vramfs --software-device`.

mod soft;
mod wgpu_device;

use std::fmt;

use crate::error::Result;
use crate::WriteFence;

pub use soft::{SoftDevice, SoftDeviceConfig};
pub use wgpu_device::WgpuDevice;

/// Opaque handle for a buffer owned by a [`Device`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl fmt::Debug for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferId({})", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferAccess {
    ReadWrite,
    /// Only usable as a copy source after creation.
    ReadOnly,
}

/// A GPU (or GPU-like) device with one in-order command queue.
///
/// Commands that return before completing (`fill_zero`, `copy_buffer`, `enqueue_write`) are
/// ordered with respect to every other command issued on the same device: a later
/// `read_buffer` always observes them.
pub trait Device: Send + Sync {
    /// Human-readable adapter description, used for logging.
    fn name(&self) -> String;

    /// Whether the device has a direct fill command. Without it, buffers are cleared by copying
    /// from a zero-filled source buffer.
    fn supports_fill(&self) -> bool;

    fn create_buffer(&self, size: u64, access: BufferAccess) -> Result<BufferId>;
    fn create_buffer_init(&self, contents: &[u8], access: BufferAccess) -> Result<BufferId>;
    fn destroy_buffer(&self, buffer: BufferId) -> Result<()>;

    /// Enqueue a zero fill of `size` bytes at `offset`.
    fn fill_zero(&self, buffer: BufferId, offset: u64, size: u64) -> Result<()>;

    /// Enqueue a copy of the first `size` bytes of `src` into the start of `dst`.
    fn copy_buffer(&self, src: BufferId, dst: BufferId, size: u64) -> Result<()>;

    /// Write `data` at `offset` and block until the device has completed the write.
    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()>;

    /// Enqueue a write. The device owns `data` until the write completes and signals the returned
    /// fence at that point. Devices that must merge partial edge words may block on a read-back
    /// before queueing; the write itself never blocks the caller.
    fn enqueue_write(&self, buffer: BufferId, offset: u64, data: Vec<u8>) -> Result<WriteFence>;

    /// Blocking read of `out.len()` bytes at `offset`.
    fn read_buffer(&self, buffer: BufferId, offset: u64, out: &mut [u8]) -> Result<()>;

    /// Block until every command submitted so far has completed.
    fn wait_idle(&self);
}

pub(crate) fn check_range(
    buffer_size: u64,
    offset: u64,
    len: u64,
) -> std::result::Result<(), crate::DeviceError> {
    match offset.checked_add(len) {
        Some(end) if end <= buffer_size => Ok(()),
        _ => Err(crate::DeviceError::OutOfBounds {
            offset,
            len,
            buffer_size,
        }),
    }
}
