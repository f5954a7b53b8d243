use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::device::{BufferAccess, BufferId, Device, SoftDevice, SoftDeviceConfig, WgpuDevice};
use crate::{BackendError, DeviceError, BLOCK_SIZE};

pub type OpenResult = Result<Arc<dyn Device>, BackendError>;

/// Opens a [`Device`]. Called by [`Backend`] on each initialization attempt.
pub trait DeviceProvider: Send + Sync {
    fn open(&self) -> OpenResult;
}

impl<F> DeviceProvider for F
where
    F: Fn() -> OpenResult + Send + Sync,
{
    fn open(&self) -> OpenResult {
        self()
    }
}

/// An initialized device plus whatever it needs to clear buffers.
pub struct DeviceHandle {
    device: Arc<dyn Device>,
    /// Copy source for clears on devices without a fill command.
    zero_buffer: Option<BufferId>,
}

impl DeviceHandle {
    fn open(provider: &dyn DeviceProvider) -> Result<Self, BackendError> {
        let device = provider.open()?;

        let zero_buffer = if device.supports_fill() {
            None
        } else {
            let zeros = vec![0u8; BLOCK_SIZE];
            let zero = device
                .create_buffer_init(&zeros, BufferAccess::ReadOnly)
                .map_err(BackendError::ZeroBuffer)?;
            Some(zero)
        };

        info!(
            device = %device.name(),
            fill = zero_buffer.is_none(),
            "GPU backend initialized"
        );
        Ok(Self {
            device,
            zero_buffer,
        })
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Zero one whole block-sized buffer.
    pub fn clear_buffer(&self, buffer: BufferId) -> Result<(), DeviceError> {
        match self.zero_buffer {
            None => self.device.fill_zero(buffer, 0, BLOCK_SIZE as u64),
            Some(zero) => self.device.copy_buffer(zero, buffer, BLOCK_SIZE as u64),
        }
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("device", &self.device.name())
            .field("zero_buffer", &self.zero_buffer)
            .finish()
    }
}

/// Lazily initialized connection to the GPU.
///
/// The first successful initialization is kept for the lifetime of the value. A failed attempt is
/// not remembered, so the next call probes the hardware again. The slot lock is held across the
/// attempt, so concurrent first callers initialize exactly once.
pub struct Backend {
    provider: Box<dyn DeviceProvider>,
    handle: Mutex<Option<Arc<DeviceHandle>>>,
}

impl Backend {
    pub fn new(provider: impl DeviceProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            handle: Mutex::new(None),
        }
    }

    /// Backend over the first GPU adapter `wgpu` can find.
    pub fn wgpu() -> Self {
        Self::new(|| -> OpenResult { Ok(Arc::new(WgpuDevice::open()?)) })
    }

    /// Backend over a fresh [`SoftDevice`] per initialization.
    pub fn software(config: SoftDeviceConfig) -> Self {
        Self::new(move || -> OpenResult { Ok(Arc::new(SoftDevice::new(config.clone()))) })
    }

    /// Returns the device handle, initializing it if needed.
    pub fn handle(&self) -> Result<Arc<DeviceHandle>, BackendError> {
        let mut slot = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handle) = slot.as_ref() {
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(DeviceHandle::open(self.provider.as_ref())?);
        *slot = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// The handle if initialization already succeeded, without probing.
    pub fn initialized(&self) -> Option<Arc<DeviceHandle>> {
        self.handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_available(&self) -> bool {
        match self.handle() {
            Ok(_) => true,
            Err(err) => {
                debug!(%err, "GPU backend unavailable");
                false
            }
        }
    }

    /// Wait for every queued device command, including asynchronous writes, to complete.
    pub fn shutdown(&self) {
        if let Some(handle) = self.initialized() {
            handle.device.wait_idle();
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("initialized", &self.initialized().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn failed_initialization_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let backend = Backend::new(move || -> OpenResult {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(BackendError::NoGpuDevice)
            } else {
                Ok(Arc::new(SoftDevice::default()))
            }
        });

        assert!(!backend.is_available());
        assert!(backend.initialized().is_none());
        assert!(backend.is_available());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn successful_initialization_is_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let backend = Backend::new(move || -> OpenResult {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(SoftDevice::default()))
        });

        for _ in 0..3 {
            assert!(backend.is_available());
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_first_use_initializes_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let backend = Arc::new(Backend::new(move || -> OpenResult {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(SoftDevice::default()))
        }));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let backend = Arc::clone(&backend);
                thread::spawn(move || backend.is_available())
            })
            .collect();
        for t in threads {
            assert!(t.join().unwrap());
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_buffer_is_created_without_fill_support() {
        let backend = Backend::software(SoftDeviceConfig {
            supports_fill: false,
            ..Default::default()
        });
        let handle = backend.handle().unwrap();
        assert!(handle.zero_buffer.is_some());

        let buf = handle
            .device()
            .create_buffer(BLOCK_SIZE as u64, BufferAccess::ReadWrite)
            .unwrap();
        handle.clear_buffer(buf).unwrap();
        let mut out = vec![0xffu8; 64];
        handle.device().read_buffer(buf, 100, &mut out).unwrap();
        assert!(out.iter().all(|b| *b == 0));
    }

    #[test]
    fn zero_buffer_allocation_failure_makes_backend_unavailable() {
        let backend = Backend::software(SoftDeviceConfig {
            supports_fill: false,
            max_buffers: Some(0),
            ..Default::default()
        });
        assert!(matches!(
            backend.handle().unwrap_err(),
            BackendError::ZeroBuffer(DeviceError::OutOfMemory { .. })
        ));
        assert!(!backend.is_available());
    }
}
