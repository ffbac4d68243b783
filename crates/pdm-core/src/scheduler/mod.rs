//! Admission control and dispatch.
//!
//! A poll thread scans the [`PendingQueue`] and admits tasks whose host still
//! has a free slot; admitted jobs travel over a channel to a dispatch thread
//! that hands them to a fixed [`WorkerPool`]. Completions free the slot and
//! wake the poll thread.

mod guard;
mod pool;
mod runner;
mod slots;

use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::MAX_POOL_SIZE;
use crate::control::{Latch, Signal};
use crate::job::{DownloadJob, JobContext};
use crate::model::{finalize_status, Image, JobKey, PostId, Status};
use crate::queue::{PendingQueue, QueueClosed};

pub use guard::{Pause, PauseGuard};
pub use pool::{Task, WorkerPool};
pub use slots::HostSlots;

/// Longest the poll loop sleeps without a wake-up before re-reading the caps.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Upper bound of the interval between finished-flag checks during stop.
pub const STOP_POLL_MAX: Duration = Duration::from_millis(500);
const STOP_POLL_MIN: Duration = Duration::from_millis(10);
/// Grace period for [`Scheduler::shutdown`].
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    pub pool_size: usize,
    /// Bound on tasks waiting for admission; `None` is unbounded.
    pub queue_capacity: Option<usize>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            pool_size: MAX_POOL_SIZE,
            queue_capacity: None,
        }
    }
}

/// State shared between the control loops, the workers and the public handle.
struct Shared {
    ctx: Arc<JobContext>,
    pending: PendingQueue,
    slots: HostSlots,
    pause: Pause,
    /// Jobs admitted and not yet finished (or taken by a stop).
    in_flight: Mutex<HashMap<JobKey, Arc<DownloadJob>>>,
    wake: Signal,
    shutdown: Latch,
    pool_size: usize,
    /// Serializes submissions so two of them never reset the same post.
    submitting: Mutex<()>,
}

impl Shared {
    fn in_flight(&self) -> MutexGuard<'_, HashMap<JobKey, Arc<DownloadJob>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn can_run(&self, host: &str, per_host: usize, global: usize) -> bool {
        !self.pause.is_paused() && self.slots.try_acquire(host, per_host, global)
    }

    /// One admission pass over the queue snapshot.
    fn admit(&self, exec: &mpsc::Sender<Arc<DownloadJob>>) {
        let settings = self.ctx.settings.get();
        let per_host = settings.max_threads_per_host.max(1);
        let global = settings.effective_max_total(self.pool_size);

        for task in self.pending.peek() {
            if self.shutdown.is_set() {
                return;
            }
            if !self.can_run(task.host(), per_host, global) {
                continue;
            }
            let key = task.key();
            let host = task.host().to_string();
            let job = Arc::new(DownloadJob::new(task.image, Arc::clone(&self.ctx)));
            {
                // Held across the removal so a concurrent stop sees the job
                // either still queued or already in flight.
                let mut in_flight = self.in_flight();
                if !self.pending.remove(&key) {
                    drop(in_flight);
                    self.slots.release(&host);
                    continue;
                }
                in_flight.insert(key, Arc::clone(&job));
            }
            tracing::debug!(
                %key,
                host = %host,
                running = self.slots.running(&host),
                total = self.slots.total(),
                "admitted"
            );
            if let Err(mpsc::SendError(job)) = exec.send(job) {
                job.stop();
                runner::run_job(self, job);
            }
        }
    }

    fn after_job_finish(&self, job: &Arc<DownloadJob>) {
        let key = job.key();
        if let Err(e) = self.ctx.store.on_job_finished(key) {
            tracing::warn!(%key, "job completion hook failed: {:#}", e);
        }
        // The post stays pending until it is finalized, so a restart cannot
        // slip in between the last decrement and the final status write.
        let remaining = self.pending.decrement_then(key, || self.finalize_post(key.post_id));
        tracing::debug!(%key, remaining, "job finished");
        self.slots.release(&job.image().host);
        {
            let mut in_flight = self.in_flight();
            if in_flight.get(&key).is_some_and(|j| Arc::ptr_eq(j, job)) {
                in_flight.remove(&key);
            }
        }
        self.wake.notify();
    }

    fn finalize_post(&self, post_id: PostId) {
        let images = match self.ctx.store.find_images_by_post(post_id) {
            Ok(images) => images,
            Err(e) => {
                tracing::warn!(post_id, "cannot load images to finalize post: {:#}", e);
                return;
            }
        };
        let Some(status) = finalize_status(&images) else {
            return;
        };
        match self.ctx.store.update_post_status(post_id, status) {
            Ok(()) => tracing::info!(post_id, %status, "post finished"),
            Err(e) => tracing::warn!(post_id, "cannot persist post status: {:#}", e),
        }
    }
}

fn poll_loop(shared: Arc<Shared>, exec: mpsc::Sender<Arc<DownloadJob>>) {
    while !shared.shutdown.is_set() {
        shared.admit(&exec);
        shared.wake.wait_timeout(POLL_INTERVAL);
    }
    tracing::debug!("poll loop exited");
}

/// Runs until the poll loop drops its sender.
fn dispatch_loop(shared: Arc<Shared>, pool: Arc<WorkerPool>, exec: mpsc::Receiver<Arc<DownloadJob>>) {
    for job in exec {
        let worker_shared = Arc::clone(&shared);
        let task: Task = Box::new(move || runner::run_job(&worker_shared, job));
        if let Err(task) = pool.execute(task) {
            // Pool already shut down: run inline so bookkeeping still happens.
            task();
        }
    }
    tracing::debug!("dispatch loop exited");
}

/// Waits for each job's finished flag with a growing poll interval.
/// Returns false if `deadline` passed first.
fn await_finished(jobs: &[Arc<DownloadJob>], deadline: Option<Instant>) -> bool {
    let mut interval = STOP_POLL_MIN;
    for job in jobs {
        while !job.wait_finished(interval) {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            interval = (interval * 2).min(STOP_POLL_MAX);
        }
    }
    true
}

/// Handle to a running scheduler. Dropping it shuts everything down.
pub struct Scheduler {
    shared: Arc<Shared>,
    pool: Arc<WorkerPool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn start(ctx: Arc<JobContext>) -> Result<Self> {
        Self::start_with(ctx, SchedulerOptions::default())
    }

    pub fn start_with(ctx: Arc<JobContext>, options: SchedulerOptions) -> Result<Self> {
        let pool = Arc::new(WorkerPool::new(options.pool_size)?);
        let pending = match options.queue_capacity {
            Some(cap) => PendingQueue::bounded(cap),
            None => PendingQueue::new(),
        };
        let shared = Arc::new(Shared {
            ctx,
            pending,
            slots: HostSlots::new(),
            pause: Pause::default(),
            in_flight: Mutex::new(HashMap::new()),
            wake: Signal::new(),
            shutdown: Latch::new(),
            pool_size: pool.size(),
            submitting: Mutex::new(()),
        });

        let (exec_tx, exec_rx) = mpsc::channel();
        let poll = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("pdm-poll".into())
                .spawn(move || poll_loop(shared, exec_tx))
                .context("spawn poll thread")?
        };
        let dispatch = {
            let shared = Arc::clone(&shared);
            let pool = Arc::clone(&pool);
            thread::Builder::new()
                .name("pdm-dispatch".into())
                .spawn(move || dispatch_loop(shared, pool, exec_rx))
                .context("spawn dispatch thread")?
        };
        tracing::info!(pool_size = pool.size(), "scheduler started");

        Ok(Self {
            shared,
            pool,
            threads: Mutex::new(vec![poll, dispatch]),
        })
    }

    /// Queues one image. `Ok(false)` if the same image is already queued or running.
    pub fn enqueue(&self, image: Image) -> Result<bool, QueueClosed> {
        let queued = self.shared.pending.put(image)?;
        if queued {
            self.shared.wake.notify();
        }
        Ok(queued)
    }

    /// Resets every non-complete image of the post to `PENDING` and queues it.
    /// Returns how many images were queued; 0 if the post is still pending,
    /// in which case nothing is touched.
    pub fn submit(&self, post_id: PostId) -> Result<usize> {
        Ok(self.try_submit(post_id)?.unwrap_or(0))
    }

    /// `None` if the post still has queued or running jobs.
    fn try_submit(&self, post_id: PostId) -> Result<Option<usize>> {
        let _submitting = self.shared.submitting.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shared.pending.is_pending(post_id) {
            tracing::debug!(post_id, "submit ignored: post is still pending");
            return Ok(None);
        }
        let store = &self.shared.ctx.store;
        let images = store.find_images_by_post_incomplete(post_id)?;
        if images.is_empty() {
            tracing::debug!(post_id, "nothing to download");
            return Ok(Some(0));
        }
        for image in &images {
            store.update_image_status(image.id, Status::Pending)?;
        }
        store.update_post_status(post_id, Status::Pending)?;

        let mut queued = 0;
        for mut image in images {
            image.status = Status::Pending;
            if self.shared.pending.put(image)? {
                queued += 1;
            }
        }
        self.shared.wake.notify();
        tracing::info!(post_id, queued, "post submitted");
        Ok(Some(queued))
    }

    /// Re-runs a post's incomplete images. Rejected while the post still has
    /// queued or running jobs.
    pub fn restart(&self, post_id: PostId) -> bool {
        match self.try_submit(post_id) {
            Ok(Some(_)) => true,
            Ok(None) => {
                tracing::warn!(post_id, "restart rejected: post is still pending");
                false
            }
            Err(e) => {
                tracing::warn!(post_id, "restart failed: {:#}", e);
                false
            }
        }
    }

    /// Cancels the post's queued and running jobs, waits for the running ones
    /// to finish, then marks what is left `STOPPED`. No-op for an idle post.
    pub fn stop(&self, post_id: PostId) -> bool {
        self.stop_until(post_id, None)
    }

    fn stop_until(&self, post_id: PostId, deadline: Option<Instant>) -> bool {
        let shared = &self.shared;
        if !shared.pending.is_pending(post_id) {
            tracing::debug!(post_id, "stop: nothing pending");
            return false;
        }
        let _pause = shared.pause.hold(&shared.wake);

        let dropped = shared.pending.stop(post_id);
        let jobs: Vec<Arc<DownloadJob>> = {
            let mut in_flight = shared.in_flight();
            let keys: Vec<JobKey> = in_flight.keys().filter(|k| k.post_id == post_id).copied().collect();
            keys.iter().filter_map(|k| in_flight.remove(k)).collect()
        };
        for job in &jobs {
            job.stop();
        }
        let settle = || {
            if let Err(e) = shared.ctx.store.stop_images_by_post_incomplete(post_id) {
                tracing::warn!(post_id, "cannot mark images stopped: {:#}", e);
            }
            shared.finalize_post(post_id);
        };
        if await_finished(&jobs, deadline) {
            // A restart that got in after the last job finished owns the post now.
            if !shared.pending.with_idle_post(post_id, settle) {
                tracing::debug!(post_id, "stop: post was resubmitted meanwhile");
            }
        } else {
            tracing::warn!(post_id, "stop: jobs still running at deadline");
            settle();
        }
        tracing::info!(post_id, queued = dropped.len(), running = jobs.len(), "post stopped");
        true
    }

    fn known_posts(&self, ids: Option<&[PostId]>) -> Vec<PostId> {
        if let Some(ids) = ids {
            return ids.to_vec();
        }
        let mut all: BTreeSet<PostId> = self.shared.pending.pending_posts().into_iter().collect();
        match self.shared.ctx.store.find_all_posts() {
            Ok(posts) => all.extend(posts.into_iter().map(|p| p.id)),
            Err(e) => tracing::warn!("cannot list posts: {:#}", e),
        }
        all.into_iter().collect()
    }

    /// Stops the given posts, or every known post for `None`. Returns how many were stopped.
    pub fn stop_all(&self, ids: Option<&[PostId]>) -> usize {
        self.known_posts(ids)
            .into_iter()
            .filter(|&id| self.stop(id))
            .count()
    }

    /// Restarts the given posts, or every known post for `None`. Returns how many were restarted.
    pub fn restart_all(&self, ids: Option<&[PostId]>) -> usize {
        self.known_posts(ids)
            .into_iter()
            .filter(|&id| self.restart(id))
            .count()
    }

    /// Number of admitted jobs that have not finished yet.
    pub fn running_count(&self) -> usize {
        self.shared.in_flight().len()
    }

    pub fn is_pending(&self, post_id: PostId) -> bool {
        self.shared.pending.is_pending(post_id)
    }

    pub fn pending_count(&self, post_id: PostId) -> usize {
        self.shared.pending.pending_count(post_id)
    }

    /// Unfinished jobs across all posts, queued or running.
    pub fn total_pending(&self) -> usize {
        self.shared.pending.total_pending()
    }

    /// Stops every post, ends both loops and the pool within [`SHUTDOWN_GRACE`].
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        if !shared.shutdown.set() {
            return;
        }
        tracing::info!("scheduler shutting down");
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        shared.pending.close();
        shared.wake.notify();

        for post_id in self.known_posts(None) {
            self.stop_until(post_id, Some(deadline));
        }

        let threads = std::mem::take(&mut *self.threads.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in threads {
            if handle.join().is_err() {
                tracing::error!("scheduler thread panicked");
            }
        }
        for (_, job) in shared.in_flight().drain() {
            job.stop();
        }

        self.pool.shutdown();
        let left = deadline.saturating_duration_since(Instant::now());
        if !self.pool.await_termination(left) {
            tracing::warn!("worker pool did not terminate within {:?}", SHUTDOWN_GRACE);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
