//! GPU memory block pool for vramfs.
//!
//! File content lives in fixed-size device buffers ("blocks"). This crate provides:
//!
//! - [`Device`]: the small set of buffer commands the pool needs, with a real [`WgpuDevice`] and
//!   an in-process [`SoftDevice`]
//! - [`Backend`]: lazily initialized, retry-on-failure access to one device and its queue
//! - [`BlockPool`] / [`Block`]: growable pool of zeroed buffers, checked out as RAII blocks with
//!   dirty tracking and synchronous or asynchronous writes

mod backend;
pub mod device;
mod error;
mod fence;
mod pool;

/// Size in bytes of every block.
pub const BLOCK_SIZE: usize = 128 * 1024;

pub use backend::{Backend, DeviceHandle, DeviceProvider, OpenResult};
pub use device::{BufferAccess, BufferId, Device, SoftDevice, SoftDeviceConfig, WgpuDevice};
pub use error::{BackendError, BlockError, DeviceError};
pub use fence::WriteFence;
pub use pool::{Block, BlockPool, PoolStats, WriteMode};
