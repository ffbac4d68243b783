//! Fixed-size worker pool running boxed tasks on named threads.

use anyhow::{Context, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Count of live worker threads, waitable.
#[derive(Default)]
struct Alive {
    count: Mutex<usize>,
    cv: Condvar,
}

impl Alive {
    fn exit(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        self.cv.notify_all();
    }
}

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    alive: Arc<Alive>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self> {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<Task>();
        let rx = Arc::new(Mutex::new(rx));
        let alive = Arc::new(Alive::default());
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let rx = Arc::clone(&rx);
            let alive_w = Arc::clone(&alive);
            *alive.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
            let handle = thread::Builder::new()
                .name(format!("pdm-worker-{i}"))
                .spawn(move || {
                    worker_loop(&rx);
                    alive_w.exit();
                });
            match handle {
                Ok(h) => workers.push(h),
                Err(e) => {
                    alive.exit();
                    return Err(e).context("spawn worker thread");
                }
            }
        }
        Ok(Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            alive,
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queues `task`; hands it back if the pool is shut down.
    pub fn execute(&self, task: Task) -> Result<(), Task> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(tx) => tx.send(task).map_err(|e| e.0),
            None => Err(task),
        }
    }

    /// Stops accepting tasks. Already queued tasks still run.
    pub fn shutdown(&self) {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Waits until every worker exited. Returns false on timeout; late
    /// workers are left detached.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let count = self.alive.count.lock().unwrap_or_else(PoisonError::into_inner);
        let (count, _) = self
            .alive
            .cv
            .wait_timeout_while(count, timeout, |n| *n > 0)
            .unwrap_or_else(PoisonError::into_inner);
        if *count > 0 {
            return false;
        }
        drop(count);
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in workers {
            let _ = handle.join();
        }
        true
    }
}

fn worker_loop(rx: &Mutex<mpsc::Receiver<Task>>) {
    loop {
        let task = {
            let rx = rx.lock().unwrap_or_else(PoisonError::into_inner);
            rx.recv()
        };
        let Ok(task) = task else {
            break;
        };
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!("worker task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_tasks_and_terminates() {
        let pool = WorkerPool::new(3).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let done = Arc::clone(&done);
            assert!(pool
                .execute(Box::new(move || {
                    done.fetch_add(1, Ordering::SeqCst);
                }))
                .is_ok());
        }
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn rejects_after_shutdown() {
        let pool = WorkerPool::new(1).unwrap();
        pool.shutdown();
        assert!(pool.execute(Box::new(|| {})).is_err());
        assert!(pool.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn survives_panicking_task() {
        let pool = WorkerPool::new(1).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        assert!(pool.execute(Box::new(|| panic!("boom"))).is_ok());
        let d = Arc::clone(&done);
        assert!(pool
            .execute(Box::new(move || {
                d.fetch_add(1, Ordering::SeqCst);
            }))
            .is_ok());
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn termination_times_out_on_long_task() {
        let pool = WorkerPool::new(1).unwrap();
        assert!(pool
            .execute(Box::new(|| std::thread::sleep(Duration::from_millis(300))))
            .is_ok());
        pool.shutdown();
        assert!(!pool.await_termination(Duration::from_millis(20)));
        assert!(pool.await_termination(Duration::from_secs(5)));
    }
}
