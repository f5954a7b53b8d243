use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::backend::{Backend, DeviceHandle};
use crate::device::{BufferAccess, BufferId};
use crate::{BlockError, DeviceError, WriteFence, BLOCK_SIZE};

#[derive(Default)]
struct FreeList {
    free: Vec<BufferId>,
    total_blocks: usize,
    /// Set by the first successful growth; every pooled buffer belongs to this device.
    handle: Option<Arc<DeviceHandle>>,
}

#[derive(Default)]
struct PoolShared {
    state: Mutex<FreeList>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, FreeList> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, buffer: BufferId) {
        self.lock().free.push(buffer);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total_blocks: usize,
    pub free_blocks: usize,
    pub block_size: usize,
}

/// Pool of block-sized device buffers.
///
/// Buffers are allocated on demand by [`BlockPool::increase_pool`] and never given back to the
/// device; released blocks go back on the free list.
pub struct BlockPool {
    backend: Arc<Backend>,
    shared: Arc<PoolShared>,
}

impl BlockPool {
    pub fn new(backend: Arc<Backend>) -> Self {
        Self {
            backend,
            shared: Arc::default(),
        }
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// Total number of blocks ever allocated.
    pub fn pool_size(&self) -> usize {
        self.shared.lock().total_blocks
    }

    /// Number of blocks not currently checked out.
    pub fn pool_available(&self) -> usize {
        self.shared.lock().free.len()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            total_blocks: state.total_blocks,
            free_blocks: state.free.len(),
            block_size: BLOCK_SIZE,
        }
    }

    /// Grow the pool by enough blocks to hold `size` bytes.
    ///
    /// Returns the number of bytes actually added. Growth stops at the first block that cannot be
    /// allocated or cleared; blocks added before that point stay in the pool, so a result smaller
    /// than `size` means a partial success rather than nothing at all. On full success the result
    /// is rounded up to a whole number of blocks.
    pub fn increase_pool(&self, size: u64) -> u64 {
        let block_size = BLOCK_SIZE as u64;
        let block_count = size.div_ceil(block_size);
        if block_count == 0 {
            return 0;
        }

        let handle = match self.backend.handle() {
            Ok(handle) => handle,
            Err(err) => {
                warn!(%err, "cannot grow block pool without a GPU backend");
                return 0;
            }
        };

        for i in 0..block_count {
            if let Err(err) = self.add_block(&handle) {
                warn!(%err, added = i, requested = block_count, "block pool growth stopped early");
                return i * block_size;
            }
        }

        debug!(blocks = block_count, total = self.pool_size(), "block pool grown");
        block_count * block_size
    }

    fn add_block(&self, handle: &Arc<DeviceHandle>) -> Result<(), DeviceError> {
        let device = handle.device();
        let buffer = device.create_buffer(BLOCK_SIZE as u64, BufferAccess::ReadWrite)?;
        if let Err(err) = handle.clear_buffer(buffer) {
            let _ = device.destroy_buffer(buffer);
            return Err(err);
        }

        let mut state = self.shared.lock();
        state.free.push(buffer);
        state.total_blocks += 1;
        state.handle.get_or_insert_with(|| Arc::clone(handle));
        Ok(())
    }

    /// Check out a free block. Returns `None` when the free list is empty; the pool never grows
    /// implicitly.
    pub fn allocate(&self) -> Option<Block> {
        let mut state = self.shared.lock();
        let handle = state.handle.clone()?;
        let buffer = state.free.pop()?;
        drop(state);

        Some(Block {
            buffer,
            handle,
            pool: Arc::clone(&self.shared),
            dirty: true,
            last_write: None,
        })
    }
}

impl fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPool")
            .field("stats", &self.stats())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Block until the device has completed the write.
    Sync,
    /// Return once the write is queued; see [`Block::sync`].
    Async,
}

/// A checked-out block. Dropping it returns the buffer to the pool.
///
/// A new block is dirty: it has not been written since checkout and reads back as zeros without
/// touching the device. Dropping does not wait for pending writes; call [`Block::sync`] first
/// when the data must have landed.
pub struct Block {
    buffer: BufferId,
    handle: Arc<DeviceHandle>,
    pool: Arc<PoolShared>,
    dirty: bool,
    last_write: Option<WriteFence>,
}

impl Block {
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn check_range(offset: u64, len: usize) -> Result<(), BlockError> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= BLOCK_SIZE as u64 => Ok(()),
            _ => Err(BlockError::OutOfBounds {
                offset,
                len,
                block_size: BLOCK_SIZE,
            }),
        }
    }

    /// Read `out.len()` bytes starting at `offset`.
    pub fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), BlockError> {
        Self::check_range(offset, out.len())?;
        if self.dirty {
            out.fill(0);
            return Ok(());
        }

        // The queue is in order, so any earlier write to this buffer lands before this read.
        self.handle
            .device()
            .read_buffer(self.buffer, offset, out)?;
        Ok(())
    }

    /// Write `data` at `offset`.
    ///
    /// The first partial write to a dirty block clears the whole buffer first so the bytes around
    /// it read back as zeros. In [`WriteMode::Async`] the data is copied and the copy handed to the
    /// device, so `data` only needs to live for the duration of the call in both modes.
    pub fn write(&mut self, offset: u64, data: &[u8], mode: WriteMode) -> Result<(), BlockError> {
        Self::check_range(offset, data.len())?;
        if self.dirty && data.len() != BLOCK_SIZE {
            self.handle.clear_buffer(self.buffer)?;
        }

        let device = self.handle.device();
        let fence = match mode {
            WriteMode::Sync => {
                device.write_buffer(self.buffer, offset, data)?;
                WriteFence::signaled()
            }
            WriteMode::Async => device.enqueue_write(self.buffer, offset, data.to_vec())?,
        };

        self.last_write = Some(fence);
        self.dirty = false;
        Ok(())
    }

    /// Block until the most recent write has completed. No-op without one.
    pub fn sync(&self) {
        if let Some(fence) = &self.last_write {
            fence.wait();
        }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        self.pool.release(self.buffer);
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("buffer", &self.buffer)
            .field("dirty", &self.dirty)
            .field("last_write", &self.last_write)
            .finish()
    }
}
