//! Cross-thread signalling used by the scheduler and download jobs.
//!
//! A [`Latch`] is a one-shot flag that can also be waited on with a timeout;
//! jobs use one as their stop token and one as their "finished" flag. A
//! [`Signal`] is an auto-reset wake-up with a bounded wait, used to nudge the
//! scheduler's poll loop when capacity is freed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// One-shot flag with acquire/release visibility and a timed wait.
#[derive(Debug, Default)]
pub struct Latch {
    flag: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the latch and wakes every waiter. Returns true only for the call
    /// that actually flipped it.
    pub fn set(&self) -> bool {
        let first = !self.flag.swap(true, Ordering::AcqRel);
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cv.notify_all();
        first
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Blocks until the latch is set or `timeout` elapses. Returns whether it is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_set() {
            return true;
        }
        let _ = self
            .cv
            .wait_timeout_while(guard, timeout, |_| !self.is_set())
            .unwrap_or_else(PoisonError::into_inner);
        self.is_set()
    }
}

/// Auto-reset wake-up: `notify` is remembered until the next wait consumes it,
/// so a notify that races ahead of the waiter is never lost.
#[derive(Debug, Default)]
pub struct Signal {
    pending: Mutex<bool>,
    cv: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = true;
        self.cv.notify_all();
    }

    /// Waits for a notify or the timeout. Returns true if woken by a notify.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut pending, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |p| !*p)
            .unwrap_or_else(PoisonError::into_inner);
        let woken = *pending;
        *pending = false;
        woken
    }
}

/// Unix socket on which `pdm run` accepts control commands.
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("pdm")?.get_state_home();
    Ok(dir.join("control.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn latch_set_once() {
        let latch = Latch::new();
        assert!(!latch.is_set());
        assert!(latch.set());
        assert!(!latch.set());
        assert!(latch.is_set());
        assert!(latch.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn latch_wakes_waiter_from_other_thread() {
        let latch = Arc::new(Latch::new());
        let setter = Arc::clone(&latch);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            setter.set();
        });
        let start = Instant::now();
        assert!(latch.wait_timeout(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn latch_times_out_when_unset() {
        let latch = Latch::new();
        assert!(!latch.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn signal_remembers_early_notify() {
        let signal = Signal::new();
        signal.notify();
        assert!(signal.wait_timeout(Duration::from_millis(1)));
        // Consumed by the previous wait.
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }
}
