//! One download of one image: resolve, stream, finalize.
//!
//! A [`DownloadJob`] runs one *attempt* at a time; the scheduler's runner
//! repeats attempts under the retry policy and sets the finished flag once
//! the job is done for good.

mod context;
mod error;
mod transfer;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::control::Latch;
use crate::layout;
use crate::model::{Image, JobKey, Status};

pub use context::JobContext;
pub use error::{JobError, TransferError};
pub use transfer::BUFFER_SIZE;

pub struct DownloadJob {
    image: Image,
    ctx: Arc<JobContext>,
    stop: Latch,
    finished: Latch,
    current: AtomicU64,
    total: AtomicU64,
    last_status: Mutex<Option<Status>>,
}

impl DownloadJob {
    pub fn new(image: Image, ctx: Arc<JobContext>) -> Self {
        Self {
            image,
            ctx,
            stop: Latch::new(),
            finished: Latch::new(),
            current: AtomicU64::new(0),
            total: AtomicU64::new(0),
            last_status: Mutex::new(None),
        }
    }

    pub fn key(&self) -> JobKey {
        self.image.key()
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Requests cancellation. A running transfer is aborted from its next curl callback.
    pub fn stop(&self) {
        if self.stop.set() {
            tracing::debug!(post_id = self.image.post_id, image_id = self.image.id, "stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_set()
    }

    pub(crate) fn stop_token(&self) -> &Latch {
        &self.stop
    }

    pub fn wait_finished(&self, timeout: Duration) -> bool {
        self.finished.wait_timeout(timeout)
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.set();
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Status persisted by the latest attempt, if any ran.
    pub fn last_status(&self) -> Option<Status> {
        *self.last_status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_total(&self, total: u64) -> Result<(), JobError> {
        self.total.store(total, Ordering::Release);
        self.ctx.store.update_image_total(self.image.id, total)?;
        Ok(())
    }

    fn advance(&self, n: u64) -> Result<u64, JobError> {
        let current = self.current.fetch_add(n, Ordering::AcqRel) + n;
        self.ctx.store.update_image_current(self.image.id, current)?;
        Ok(current)
    }

    fn checkpoint(&self) -> Result<(), JobError> {
        if self.is_stopped() {
            return Err(JobError::Cancelled);
        }
        Ok(())
    }

    /// Runs one attempt and persists the image status it ends in.
    ///
    /// Errors raised after a stop request are swallowed: the image ends
    /// `STOPPED` and the attempt reports success.
    pub fn attempt(&self) -> Result<(), JobError> {
        let result = self.run_steps();
        let status = self.outcome(&result);
        *self.last_status.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
        if let Err(e) = self.ctx.store.update_image_status(self.image.id, status) {
            tracing::warn!(image_id = self.image.id, "cannot persist status {}: {:#}", status, e);
        }
        match result {
            Err(e) if !self.is_stopped() => Err(e),
            _ => Ok(()),
        }
    }

    /// `COMPLETE` needs both every declared byte and a successful finalize:
    /// a fully transferred body that is not an image still ends `ERROR`.
    fn outcome(&self, result: &Result<PathBuf, JobError>) -> Status {
        let total = self.total();
        if result.is_ok() && total > 0 && self.current() == total {
            Status::Complete
        } else if self.is_stopped() {
            Status::Stopped
        } else {
            Status::Error
        }
    }

    fn run_steps(&self) -> Result<PathBuf, JobError> {
        let image = &self.image;
        let store = &self.ctx.store;
        self.checkpoint()?;

        store.update_image_status(image.id, Status::Downloading)?;
        self.current.store(0, Ordering::Release);
        self.total.store(0, Ordering::Release);
        store.update_image_current(image.id, 0)?;
        self.ctx.mark_post_downloading(image.post_id)?;

        self.checkpoint()?;
        let resolved = self.ctx.resolver.resolve(image)?;
        let mut name = layout::sanitize_filename(&resolved.name);
        if name.is_empty() {
            name = format!("image_{}", image.id);
        }

        self.checkpoint()?;
        let folder = self.ctx.prepare_post_folder(image.post_id)?;

        self.checkpoint()?;
        let temp = layout::temp_path(&folder, image.index, &name);
        let finished = self.transfer_and_finalize(&resolved.url, &folder, &name, &temp);
        if finished.is_err() {
            remove_if_exists(&temp);
        }
        let path = finished?;
        tracing::info!(
            post_id = image.post_id,
            image_id = image.id,
            bytes = self.current(),
            "saved {}",
            path.display()
        );
        Ok(path)
    }

    fn transfer_and_finalize(
        &self,
        url: &str,
        folder: &Path,
        name: &str,
        temp: &Path,
    ) -> Result<PathBuf, JobError> {
        tracing::debug!(image_id = self.image.id, url, "GET");
        transfer::fetch(self, url, temp)?;
        self.checkpoint()?;

        let format = layout::sniff_file(temp)?.ok_or_else(|| JobError::Recognition(temp.to_path_buf()))?;
        let file_name = layout::corrected_name(name, format);
        let force_order = self.ctx.settings.get().force_order;
        let target = layout::final_path(folder, self.image.index, &file_name, force_order);

        let finalize_err = |source: io::Error| JobError::Finalize {
            path: target.clone(),
            source,
        };
        match fs::remove_file(&target) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(finalize_err(e)),
            _ => {}
        }
        fs::rename(temp, &target).map_err(finalize_err)?;
        Ok(target)
    }
}

fn remove_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!("cannot remove {}: {}", path.display(), e);
        }
    }
}
