use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use tracing::{debug, info};
use wgpu::util::DeviceExt as _;

use super::{check_range, BufferAccess, BufferId, Device};
use crate::error::Result;
use crate::{BackendError, DeviceError, WriteFence};

const ALIGN: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

fn align_down(value: u64) -> u64 {
    value / ALIGN * ALIGN
}

fn align_up(value: u64) -> u64 {
    value.div_ceil(ALIGN) * ALIGN
}

/// Whether `[offset, offset + len)` can be copied without widening to the surrounding words.
fn is_aligned(offset: u64, len: u64) -> bool {
    offset % ALIGN == 0 && len % ALIGN == 0
}

fn is_gpu(device_type: wgpu::DeviceType) -> bool {
    matches!(
        device_type,
        wgpu::DeviceType::DiscreteGpu | wgpu::DeviceType::IntegratedGpu | wgpu::DeviceType::VirtualGpu
    )
}

/// [`Device`] backed by a `wgpu` adapter.
///
/// wgpu exposes exactly one queue per device and executes submissions in order, which is what the
/// block pool relies on. Buffer copies and writes must be 4-byte aligned; unaligned ranges are
/// widened and the edges preserved with a read-modify-write.
pub struct WgpuDevice {
    info: wgpu::AdapterInfo,
    device: Arc<wgpu::Device>,
    queue: wgpu::Queue,
    max_buffer_size: u64,
    buffers: Mutex<HashMap<BufferId, Arc<wgpu::Buffer>>>,
    next_id: AtomicU64,
}

impl WgpuDevice {
    /// Enumerate adapters on the primary backends and open the first GPU.
    ///
    /// CPU (software rasterizer) adapters are skipped: storing data in them would just be a slower
    /// RAM disk.
    pub fn open() -> std::result::Result<Self, BackendError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapters = instance.enumerate_adapters(wgpu::Backends::PRIMARY);
        if adapters.is_empty() {
            return Err(BackendError::NoPlatform);
        }

        let adapter = adapters
            .into_iter()
            .find(|adapter| is_gpu(adapter.get_info().device_type))
            .ok_or(BackendError::NoGpuDevice)?;
        let info = adapter.get_info();
        let limits = adapter.limits();

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("vramfs device"),
                required_features: wgpu::Features::empty(),
                required_limits: limits.clone(),
            },
            None,
        ))
        .map_err(|err| BackendError::DeviceCreation(err.to_string()))?;

        info!(
            adapter = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "opened wgpu device"
        );

        Ok(Self {
            info,
            device: Arc::new(device),
            queue,
            max_buffer_size: limits.max_buffer_size,
            buffers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn buffer(&self, id: BufferId) -> Result<Arc<wgpu::Buffer>> {
        self.buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned()
            .ok_or(DeviceError::InvalidBuffer(id))
    }

    fn register(&self, buffer: wgpu::Buffer) -> BufferId {
        let id = BufferId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, Arc::new(buffer));
        id
    }

    fn usages(access: BufferAccess) -> wgpu::BufferUsages {
        match access {
            BufferAccess::ReadWrite => wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            BufferAccess::ReadOnly => wgpu::BufferUsages::COPY_SRC,
        }
    }

    /// Widen `[offset, offset + data.len())` to copy alignment, filling the extra edge bytes with
    /// the buffer's current contents.
    fn aligned_payload<'a>(
        &self,
        buffer: BufferId,
        offset: u64,
        data: Cow<'a, [u8]>,
    ) -> Result<(u64, Cow<'a, [u8]>)> {
        if is_aligned(offset, data.len() as u64) {
            return Ok((offset, data));
        }

        let end = offset + data.len() as u64;
        let start = align_down(offset);
        let aligned_end = align_up(end);

        let mut widened = vec![0u8; (aligned_end - start) as usize];
        self.read_buffer(buffer, start, &mut widened)?;
        let head = (offset - start) as usize;
        widened[head..head + data.len()].copy_from_slice(&data);
        Ok((start, Cow::Owned(widened)))
    }

    fn submit_empty(&self) -> wgpu::SubmissionIndex {
        self.queue.submit(std::iter::empty())
    }
}

impl Device for WgpuDevice {
    fn name(&self) -> String {
        format!("{} ({:?})", self.info.name, self.info.backend)
    }

    fn supports_fill(&self) -> bool {
        // `CommandEncoder::clear_buffer` is core wgpu functionality.
        true
    }

    fn create_buffer(&self, size: u64, access: BufferAccess) -> Result<BufferId> {
        if size > self.max_buffer_size {
            return Err(DeviceError::OutOfMemory { size });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("vramfs block"),
            size: align_up(size),
            usage: Self::usages(access),
            mapped_at_creation: false,
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            debug!(%err, size, "buffer allocation failed");
            buffer.destroy();
            return Err(DeviceError::OutOfMemory { size });
        }

        Ok(self.register(buffer))
    }

    fn create_buffer_init(&self, contents: &[u8], access: BufferAccess) -> Result<BufferId> {
        let size = contents.len() as u64;
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("vramfs zero buffer"),
                contents,
                usage: Self::usages(access),
            });
        if pollster::block_on(self.device.pop_error_scope()).is_some() {
            buffer.destroy();
            return Err(DeviceError::OutOfMemory { size });
        }

        Ok(self.register(buffer))
    }

    fn destroy_buffer(&self, buffer: BufferId) -> Result<()> {
        let removed = self
            .buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&buffer)
            .ok_or(DeviceError::InvalidBuffer(buffer))?;
        removed.destroy();
        Ok(())
    }

    fn fill_zero(&self, buffer: BufferId, offset: u64, size: u64) -> Result<()> {
        let target = self.buffer(buffer)?;
        check_range(target.size(), offset, size)?;
        if offset % ALIGN != 0 || size % ALIGN != 0 {
            return Err(DeviceError::Command(format!(
                "unaligned fill: offset={offset} size={size}"
            )));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("vramfs clear"),
            });
        encoder.clear_buffer(&target, offset, Some(size));
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn copy_buffer(&self, src: BufferId, dst: BufferId, size: u64) -> Result<()> {
        let source = self.buffer(src)?;
        let target = self.buffer(dst)?;
        check_range(source.size(), 0, size)?;
        check_range(target.size(), 0, size)?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("vramfs copy"),
            });
        encoder.copy_buffer_to_buffer(&source, 0, &target, 0, align_up(size));
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let target = self.buffer(buffer)?;
        check_range(target.size(), offset, data.len() as u64)?;

        let (offset, payload) = self.aligned_payload(buffer, offset, Cow::Borrowed(data))?;
        self.queue.write_buffer(&target, offset, &payload);
        let index = self.submit_empty();
        self.device
            .poll(wgpu::Maintain::WaitForSubmissionIndex(index));
        Ok(())
    }

    /// Aligned writes return as soon as the payload is staged. An unaligned write first reads back
    /// its edge words with a blocking `read_buffer`, so only the write itself is asynchronous.
    fn enqueue_write(&self, buffer: BufferId, offset: u64, data: Vec<u8>) -> Result<WriteFence> {
        let target = self.buffer(buffer)?;
        check_range(target.size(), offset, data.len() as u64)?;

        let (offset, payload) = self.aligned_payload(buffer, offset, Cow::Owned(data))?;
        // `write_buffer` stages the payload immediately; the owned copy goes away with `payload`.
        self.queue.write_buffer(&target, offset, &payload);
        drop(payload);
        self.submit_empty();

        let device = Arc::clone(&self.device);
        let fence = WriteFence::new().with_driver(move || {
            device.poll(wgpu::Maintain::Wait);
        });
        let signal = fence.clone();
        self.queue.on_submitted_work_done(move || signal.signal());
        Ok(fence)
    }

    fn read_buffer(&self, buffer: BufferId, offset: u64, out: &mut [u8]) -> Result<()> {
        let source = self.buffer(buffer)?;
        let len = out.len() as u64;
        check_range(source.size(), offset, len)?;
        if out.is_empty() {
            return Ok(());
        }

        let start = align_down(offset);
        let end = align_up(offset + len).min(source.size());
        let span = end - start;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("vramfs readback"),
            size: span,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("vramfs readback"),
            });
        encoder.copy_buffer_to_buffer(&source, start, &staging, 0, span);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| DeviceError::Lost)?
            .map_err(|err| DeviceError::Command(err.to_string()))?;

        {
            let mapped = slice.get_mapped_range();
            let head = (offset - start) as usize;
            out.copy_from_slice(&mapped[head..head + out.len()]);
        }
        staging.unmap();
        Ok(())
    }

    fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}

impl Drop for WgpuDevice {
    fn drop(&mut self) {
        // Let queued writes land before the device goes away.
        self.wait_idle();
    }
}
