use std::sync::atomic::{AtomicUsize, Ordering};

use crate::control::Signal;

/// Admission pause shared by overlapping stops: admission resumes only when
/// the last guard is dropped.
#[derive(Debug, Default)]
pub struct Pause {
    depth: AtomicUsize,
}

impl Pause {
    pub fn is_paused(&self) -> bool {
        self.depth.load(Ordering::Acquire) > 0
    }

    pub fn hold<'a>(&'a self, wake: &'a Signal) -> PauseGuard<'a> {
        self.depth.fetch_add(1, Ordering::AcqRel);
        PauseGuard { pause: self, wake }
    }
}

pub struct PauseGuard<'a> {
    pause: &'a Pause,
    wake: &'a Signal,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        if self.pause.depth.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.wake.notify();
        }
    }
}
