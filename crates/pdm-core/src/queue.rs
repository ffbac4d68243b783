//! Pending queue: submitted tasks waiting for admission, plus per-post
//! remaining counts that stay alive until every job of the post finished.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::model::{Image, JobKey, PostId};

/// A queued download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTask {
    pub image: Image,
}

impl PendingTask {
    pub fn key(&self) -> JobKey {
        self.image.key()
    }

    pub fn host(&self) -> &str {
        &self.image.host
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("pending queue is closed")]
pub struct QueueClosed;

#[derive(Debug, Default)]
struct Inner {
    queued: VecDeque<PendingTask>,
    /// Keys queued or in flight.
    live: HashSet<JobKey>,
    /// Unfinished tasks per post, queued or in flight.
    remaining: HashMap<PostId, usize>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct PendingQueue {
    inner: Mutex<Inner>,
    space: Condvar,
    capacity: Option<usize>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue whose `put` blocks while `capacity` tasks are waiting for admission.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a download of `image`.
    ///
    /// Returns `Ok(false)` without queuing when a job for the same post and
    /// image is already queued or in flight. Blocks while a bounded queue is
    /// full; [`close`](Self::close) wakes blocked callers with `QueueClosed`.
    pub fn put(&self, image: Image) -> Result<bool, QueueClosed> {
        let key = image.key();
        let mut inner = self.lock();
        loop {
            if inner.closed {
                return Err(QueueClosed);
            }
            if inner.live.contains(&key) {
                tracing::debug!(%key, "already queued or running, not queuing again");
                return Ok(false);
            }
            match self.capacity {
                Some(cap) if inner.queued.len() >= cap => {
                    inner = self.space.wait(inner).unwrap_or_else(PoisonError::into_inner);
                }
                _ => break,
            }
        }
        inner.live.insert(key);
        *inner.remaining.entry(key.post_id).or_insert(0) += 1;
        inner.queued.push_back(PendingTask { image });
        Ok(true)
    }

    /// Snapshot of the queued tasks in submission order.
    pub fn peek(&self) -> Vec<PendingTask> {
        self.lock().queued.iter().cloned().collect()
    }

    /// Detaches an admitted task. Returns false if it was no longer queued.
    pub fn remove(&self, key: &JobKey) -> bool {
        let mut inner = self.lock();
        let Some(pos) = inner.queued.iter().position(|t| t.key() == *key) else {
            return false;
        };
        inner.queued.remove(pos);
        self.space.notify_all();
        true
    }

    /// Records that the job for `key` finished; returns how many tasks of the
    /// post remain. The count reaches zero once per run of the post.
    pub fn decrement(&self, key: JobKey) -> usize {
        self.decrement_then(key, || {})
    }

    /// [`decrement`](Self::decrement) that runs `on_last` when the post's count
    /// drops to zero, before the queue lock is released. Until `on_last`
    /// returns, [`is_pending`](Self::is_pending) still reports the post.
    /// `on_last` must not call back into the queue.
    pub fn decrement_then<F: FnOnce()>(&self, key: JobKey, on_last: F) -> usize {
        let mut inner = self.lock();
        if !inner.live.remove(&key) {
            // Already accounted for by `stop`.
            return inner.remaining.get(&key.post_id).copied().unwrap_or(0);
        }
        let left = match inner.remaining.get_mut(&key.post_id) {
            Some(n) => {
                *n = n.saturating_sub(1);
                *n
            }
            None => 0,
        };
        if left == 0 {
            on_last();
            inner.remaining.remove(&key.post_id);
        }
        left
    }

    /// Runs `f` under the queue lock if the post has nothing queued or in
    /// flight. Returns false, without running `f`, otherwise. `f` must not
    /// call back into the queue.
    pub fn with_idle_post<F: FnOnce()>(&self, post_id: PostId, f: F) -> bool {
        let inner = self.lock();
        if inner.remaining.contains_key(&post_id) {
            return false;
        }
        f();
        drop(inner);
        true
    }

    /// True while any task of the post is queued or in flight.
    pub fn is_pending(&self, post_id: PostId) -> bool {
        self.lock().remaining.contains_key(&post_id)
    }

    /// Unfinished tasks of the post (queued plus in flight).
    pub fn pending_count(&self, post_id: PostId) -> usize {
        self.lock().remaining.get(&post_id).copied().unwrap_or(0)
    }

    /// Unfinished tasks across all posts.
    pub fn total_pending(&self) -> usize {
        self.lock().remaining.values().sum()
    }

    /// Post ids with unfinished tasks.
    pub fn pending_posts(&self) -> Vec<PostId> {
        let mut ids: Vec<_> = self.lock().remaining.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Drops every queued (not yet admitted) task of the post and returns them.
    /// In-flight tasks keep their count until they call [`decrement`](Self::decrement).
    pub fn stop(&self, post_id: PostId) -> Vec<PendingTask> {
        let mut inner = self.lock();
        let (dropped, kept): (Vec<_>, Vec<_>) =
            inner.queued.drain(..).partition(|t| t.image.post_id == post_id);
        inner.queued = kept.into();
        for task in &dropped {
            inner.live.remove(&task.key());
        }
        if !dropped.is_empty() {
            if let Some(n) = inner.remaining.get_mut(&post_id) {
                *n = n.saturating_sub(dropped.len());
                if *n == 0 {
                    inner.remaining.remove(&post_id);
                }
            }
            self.space.notify_all();
        }
        dropped
    }

    /// Rejects further `put`s and wakes blocked producers.
    pub fn close(&self) {
        self.lock().closed = true;
        self.space.notify_all();
    }
}
