use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Process-wide shutdown flag shared by probes and the orchestrator.
///
/// Clone is cheap and shares state. Waiters blocked in [`wait_timeout`]
/// wake as soon as [`cancel`] is called.
///
/// [`wait_timeout`]: ShutdownToken::wait_timeout
/// [`cancel`]: ShutdownToken::cancel
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request shutdown. Repeated calls are no-ops.
    pub fn cancel(&self) {
        let (flag, wake) = &*self.inner;
        let mut cancelled = flag.lock().unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        wake.notify_all();
    }

    /// Sleep for up to `timeout`. Returns `true` if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, wake) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = flag.lock().unwrap_or_else(PoisonError::into_inner);
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            cancelled = wake
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}
