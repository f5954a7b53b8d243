use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use super::{check_range, BufferAccess, BufferId, Device};
use crate::error::Result;
use crate::{DeviceError, WriteFence};

/// Behaviour knobs for [`SoftDevice`].
///
/// The failure-injection fields exist so pool growth can be driven into partial success
/// deterministically.
#[derive(Clone, Debug)]
pub struct SoftDeviceConfig {
    /// Report a direct fill command. When false, clears go through a zero buffer copy.
    pub supports_fill: bool,
    /// Allocation fails once this many buffers exist.
    pub max_buffers: Option<usize>,
    /// The clear command with this 0-based sequence number (fill or copy) is rejected.
    pub fail_clear_at: Option<usize>,
    /// Delay applied by the queue worker before executing each queued write.
    pub write_latency: Option<Duration>,
}

impl Default for SoftDeviceConfig {
    fn default() -> Self {
        Self {
            supports_fill: true,
            max_buffers: None,
            fail_clear_at: None,
            write_latency: None,
        }
    }
}

struct SoftBuffer {
    bytes: Vec<u8>,
    access: BufferAccess,
}

type BufferMap = Arc<Mutex<HashMap<BufferId, SoftBuffer>>>;

enum Command {
    Fill {
        buffer: BufferId,
        offset: u64,
        size: u64,
    },
    Copy {
        src: BufferId,
        dst: BufferId,
        size: u64,
    },
    Write {
        buffer: BufferId,
        offset: u64,
        data: Vec<u8>,
        fence: WriteFence,
    },
    Barrier {
        fence: WriteFence,
    },
}

/// In-process device backed by host memory.
///
/// A single worker thread drains the command channel, which gives the same in-order queue
/// semantics as a real device: queued fills, copies and writes execute in submission order, and
/// blocking reads/writes first wait for everything queued before them.
pub struct SoftDevice {
    config: SoftDeviceConfig,
    buffers: BufferMap,
    next_id: AtomicU64,
    clears: AtomicUsize,
    reads: AtomicUsize,
    queue: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SoftDevice {
    pub fn new(config: SoftDeviceConfig) -> Self {
        let buffers: BufferMap = Arc::default();
        let (tx, rx) = mpsc::channel();
        let worker = {
            let buffers = Arc::clone(&buffers);
            let latency = config.write_latency;
            thread::Builder::new()
                .name("vramfs-soft-queue".into())
                .spawn(move || run_queue(rx, buffers, latency))
                .ok()
        };

        Self {
            config,
            buffers,
            next_id: AtomicU64::new(1),
            clears: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            queue: Mutex::new(worker.as_ref().map(|_| tx)),
            worker: Mutex::new(worker),
        }
    }

    /// Number of clear commands (fill or zero-buffer copy) accepted so far.
    pub fn clears_issued(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    /// Number of device reads performed so far.
    pub fn reads_issued(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of live buffers, including any zero buffer.
    pub fn buffer_count(&self) -> usize {
        self.lock_buffers().len()
    }

    fn lock_buffers(&self) -> std::sync::MutexGuard<'_, HashMap<BufferId, SoftBuffer>> {
        self.buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn submit(&self, command: Command) -> Result<()> {
        let queue = self
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let tx = queue.as_ref().ok_or(DeviceError::Lost)?;
        tx.send(command).map_err(|_| DeviceError::Lost)
    }

    fn validate(&self, buffer: BufferId, offset: u64, len: u64, writable: bool) -> Result<()> {
        let buffers = self.lock_buffers();
        let buf = buffers
            .get(&buffer)
            .ok_or(DeviceError::InvalidBuffer(buffer))?;
        if writable && buf.access == BufferAccess::ReadOnly {
            return Err(DeviceError::Command(format!("{buffer:?} is read-only")));
        }
        check_range(buf.bytes.len() as u64, offset, len)
    }

    fn count_clear(&self) -> Result<()> {
        let seq = self.clears.fetch_add(1, Ordering::SeqCst);
        if self.config.fail_clear_at == Some(seq) {
            debug!(seq, "soft device rejecting clear");
            return Err(DeviceError::Command("injected clear failure".into()));
        }
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        let fence = WriteFence::new();
        self.submit(Command::Barrier {
            fence: fence.clone(),
        })?;
        fence.wait();
        Ok(())
    }

    fn insert(&self, bytes: Vec<u8>, access: BufferAccess) -> Result<BufferId> {
        let mut buffers = self.lock_buffers();
        if let Some(max) = self.config.max_buffers {
            if buffers.len() >= max {
                return Err(DeviceError::OutOfMemory {
                    size: bytes.len() as u64,
                });
            }
        }
        let id = BufferId(self.next_id.fetch_add(1, Ordering::SeqCst));
        buffers.insert(id, SoftBuffer { bytes, access });
        Ok(id)
    }
}

impl Default for SoftDevice {
    fn default() -> Self {
        Self::new(SoftDeviceConfig::default())
    }
}

impl Device for SoftDevice {
    fn name(&self) -> String {
        "vramfs software device".into()
    }

    fn supports_fill(&self) -> bool {
        self.config.supports_fill
    }

    fn create_buffer(&self, size: u64, access: BufferAccess) -> Result<BufferId> {
        let len = usize::try_from(size).map_err(|_| DeviceError::OutOfMemory { size })?;
        self.insert(vec![0xcd; len], access)
    }

    fn create_buffer_init(&self, contents: &[u8], access: BufferAccess) -> Result<BufferId> {
        self.insert(contents.to_vec(), access)
    }

    fn destroy_buffer(&self, buffer: BufferId) -> Result<()> {
        // Queued commands may still reference the buffer.
        self.barrier()?;
        self.lock_buffers()
            .remove(&buffer)
            .map(|_| ())
            .ok_or(DeviceError::InvalidBuffer(buffer))
    }

    fn fill_zero(&self, buffer: BufferId, offset: u64, size: u64) -> Result<()> {
        if !self.config.supports_fill {
            return Err(DeviceError::Command("fill is not supported".into()));
        }
        self.validate(buffer, offset, size, true)?;
        self.count_clear()?;
        self.submit(Command::Fill {
            buffer,
            offset,
            size,
        })
    }

    fn copy_buffer(&self, src: BufferId, dst: BufferId, size: u64) -> Result<()> {
        self.validate(src, 0, size, false)?;
        self.validate(dst, 0, size, true)?;
        self.count_clear()?;
        self.submit(Command::Copy { src, dst, size })
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        self.validate(buffer, offset, data.len() as u64, true)?;
        self.barrier()?;
        let mut buffers = self.lock_buffers();
        let buf = buffers
            .get_mut(&buffer)
            .ok_or(DeviceError::InvalidBuffer(buffer))?;
        let start = offset as usize;
        buf.bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn enqueue_write(&self, buffer: BufferId, offset: u64, data: Vec<u8>) -> Result<WriteFence> {
        self.validate(buffer, offset, data.len() as u64, true)?;
        let fence = WriteFence::new();
        self.submit(Command::Write {
            buffer,
            offset,
            data,
            fence: fence.clone(),
        })?;
        Ok(fence)
    }

    fn read_buffer(&self, buffer: BufferId, offset: u64, out: &mut [u8]) -> Result<()> {
        self.validate(buffer, offset, out.len() as u64, false)?;
        self.barrier()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let buffers = self.lock_buffers();
        let buf = buffers
            .get(&buffer)
            .ok_or(DeviceError::InvalidBuffer(buffer))?;
        let start = offset as usize;
        out.copy_from_slice(&buf.bytes[start..start + out.len()]);
        Ok(())
    }

    fn wait_idle(&self) {
        let _ = self.barrier();
    }
}

impl Drop for SoftDevice {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and exit.
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

fn run_queue(rx: Receiver<Command>, buffers: BufferMap, latency: Option<Duration>) {
    for command in rx {
        match command {
            Command::Fill {
                buffer,
                offset,
                size,
            } => {
                let mut buffers = buffers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Some(buf) = buffers.get_mut(&buffer) {
                    let start = offset as usize;
                    buf.bytes[start..start + size as usize].fill(0);
                }
            }
            Command::Copy { src, dst, size } => {
                let mut buffers = buffers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let Some(data) = buffers.get(&src).map(|b| b.bytes[..size as usize].to_vec())
                else {
                    continue;
                };
                if let Some(buf) = buffers.get_mut(&dst) {
                    buf.bytes[..data.len()].copy_from_slice(&data);
                }
            }
            Command::Write {
                buffer,
                offset,
                data,
                fence,
            } => {
                if let Some(latency) = latency {
                    thread::sleep(latency);
                }
                {
                    let mut buffers =
                        buffers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    if let Some(buf) = buffers.get_mut(&buffer) {
                        let start = offset as usize;
                        buf.bytes[start..start + data.len()].copy_from_slice(&data);
                    }
                }
                // The payload is released here, once the write has landed.
                drop(data);
                fence.signal();
            }
            Command::Barrier { fence } => fence.signal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_write_is_visible_to_later_read() {
        let device = SoftDevice::new(SoftDeviceConfig {
            write_latency: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let buf = device.create_buffer(16, BufferAccess::ReadWrite).unwrap();
        device.fill_zero(buf, 0, 16).unwrap();

        let fence = device.enqueue_write(buf, 4, vec![1, 2, 3, 4]).unwrap();
        let mut out = [0xffu8; 8];
        device.read_buffer(buf, 0, &mut out).unwrap();

        assert!(fence.is_signaled());
        assert_eq!(out, [0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn copy_from_read_only_source() {
        let device = SoftDevice::default();
        let zero = device
            .create_buffer_init(&[0u8; 8], BufferAccess::ReadOnly)
            .unwrap();
        let dst = device.create_buffer(8, BufferAccess::ReadWrite).unwrap();
        device.copy_buffer(zero, dst, 8).unwrap();

        let mut out = [0xffu8; 8];
        device.read_buffer(dst, 0, &mut out).unwrap();
        assert_eq!(out, [0u8; 8]);

        let err = device.write_buffer(zero, 0, &[1]).unwrap_err();
        assert!(matches!(err, DeviceError::Command(_)));
    }

    #[test]
    fn allocation_limit_reports_out_of_memory() {
        let device = SoftDevice::new(SoftDeviceConfig {
            max_buffers: Some(1),
            ..Default::default()
        });
        device.create_buffer(8, BufferAccess::ReadWrite).unwrap();
        let err = device.create_buffer(8, BufferAccess::ReadWrite).unwrap_err();
        assert_eq!(err, DeviceError::OutOfMemory { size: 8 });
    }

    #[test]
    fn out_of_range_commands_are_rejected() {
        let device = SoftDevice::default();
        let buf = device.create_buffer(8, BufferAccess::ReadWrite).unwrap();
        let err = device.write_buffer(buf, 6, &[0; 4]).unwrap_err();
        assert!(matches!(err, DeviceError::OutOfBounds { .. }));
        let err = device.read_buffer(BufferId(999), 0, &mut [0; 1]).unwrap_err();
        assert_eq!(err, DeviceError::InvalidBuffer(BufferId(999)));
    }

    #[test]
    fn fill_without_support_fails() {
        let device = SoftDevice::new(SoftDeviceConfig {
            supports_fill: false,
            ..Default::default()
        });
        let buf = device.create_buffer(8, BufferAccess::ReadWrite).unwrap();
        assert!(device.fill_zero(buf, 0, 8).is_err());
    }
}
