//! vramfs: a FUSE filesystem whose storage lives in GPU memory.
//!
//! [`VramFs`] implements the path-based filesystem operations on top of the entry index
//! (`vramfs-index`) and the GPU block pool (`vramfs-gpu`). With the `fuse` feature, [`VramFsFuse`]
//! adapts it to the kernel's inode-based FUSE protocol.

mod config;
mod error;
mod fs;
#[cfg(feature = "fuse")]
mod fuse;

use std::sync::Arc;

use tracing::{info, warn};
use vramfs_gpu::{Backend, BlockPool, SoftDeviceConfig};

pub use config::{parse_size, Config};
pub use error::{FsError, InitError};
pub use fs::{DirEntry, FileAttributes, FileKind, VramFs, DIRECTORY_PERMISSIONS, FILE_PERMISSIONS};
#[cfg(feature = "fuse")]
pub use fuse::{mount_options, VramFsFuse};

/// The device backend selected by `config`.
pub fn backend(config: &Config) -> Arc<Backend> {
    if config.software_device {
        Arc::new(Backend::software(SoftDeviceConfig::default()))
    } else {
        Arc::new(Backend::wgpu())
    }
}

/// Reserve `size` bytes of device memory for file content.
///
/// A zero size leaves the device untouched and returns no pool. Otherwise the backend must come
/// up; a pool that ends up smaller than requested is only a warning.
pub fn provision_pool(backend: Arc<Backend>, size: u64) -> Result<Option<Arc<BlockPool>>, InitError> {
    if size == 0 {
        return Ok(None);
    }

    let handle = backend.handle()?;
    info!(device = %handle.device().name(), "GPU backend ready");

    let pool = BlockPool::new(backend);
    let added = pool.increase_pool(size);
    if added < size {
        warn!(requested = size, added, "block pool smaller than requested");
    } else {
        info!(bytes = added, blocks = pool.pool_size(), "block pool ready");
    }
    Ok(Some(Arc::new(pool)))
}
