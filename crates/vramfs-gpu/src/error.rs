use thiserror::Error;

use crate::device::BufferId;

/// Failure reported by a [`Device`](crate::Device) command.
///
/// These play the role of device status codes: the pool treats any of them at a given step as
/// "this step failed" and does not try to interpret them further.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device out of memory allocating {size} bytes")]
    OutOfMemory { size: u64 },

    #[error("unknown buffer {0:?}")]
    InvalidBuffer(BufferId),

    #[error("out of bounds: offset={offset} len={len} buffer_size={buffer_size}")]
    OutOfBounds {
        offset: u64,
        len: u64,
        buffer_size: u64,
    },

    #[error("device lost")]
    Lost,

    #[error("device command failed: {0}")]
    Command(String),
}

/// Why a [`Backend`](crate::Backend) could not produce a usable device.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("no compute platform found")]
    NoPlatform,

    #[error("no platform exposes a GPU device")]
    NoGpuDevice,

    #[error("failed to create device: {0}")]
    DeviceCreation(String),

    #[error("failed to allocate zero buffer: {0}")]
    ZeroBuffer(#[source] DeviceError),
}

/// Failure of a [`Block`](crate::Block) operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("range out of block bounds: offset={offset} len={len} block_size={block_size}")]
    OutOfBounds {
        offset: u64,
        len: usize,
        block_size: usize,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub type Result<T, E = DeviceError> = std::result::Result<T, E>;
