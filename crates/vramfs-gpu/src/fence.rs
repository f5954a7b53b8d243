use std::fmt;
use std::sync::{Arc, Condvar, Mutex};

type Driver = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct FenceState {
    signaled: Mutex<bool>,
    cond: Condvar,
}

/// Completion handle for a command submitted to a device queue.
///
/// Clones share state: signaling any clone wakes every waiter. Devices whose completion callbacks
/// only run while something polls them (wgpu) attach a driver, which `wait` calls in a loop instead
/// of parking on the condition variable.
#[derive(Clone, Default)]
pub struct WriteFence {
    state: Arc<FenceState>,
    driver: Option<Driver>,
}

impl WriteFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fence for work that has already completed (e.g. a blocking write).
    pub fn signaled() -> Self {
        let fence = Self::new();
        fence.signal();
        fence
    }

    pub fn with_driver(mut self, driver: impl Fn() + Send + Sync + 'static) -> Self {
        self.driver = Some(Arc::new(driver));
        self
    }

    pub fn signal(&self) {
        let mut signaled = self
            .state
            .signaled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *signaled = true;
        self.state.cond.notify_all();
    }

    pub fn is_signaled(&self) -> bool {
        *self
            .state
            .signaled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block the calling thread until the fence is signaled.
    pub fn wait(&self) {
        if let Some(driver) = &self.driver {
            while !self.is_signaled() {
                driver();
            }
            return;
        }

        let mut signaled = self
            .state
            .signaled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*signaled {
            signaled = self
                .state
                .cond
                .wait(signaled)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

impl fmt::Debug for WriteFence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteFence")
            .field("signaled", &self.is_signaled())
            .field("driven", &self.driver.is_some())
            .finish()
    }
}
