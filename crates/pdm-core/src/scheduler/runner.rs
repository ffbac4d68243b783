//! Runs one admitted job under the retry policy and does the completion
//! bookkeeping that must happen whatever the outcome.

use std::sync::Arc;

use super::Shared;
use crate::job::DownloadJob;
use crate::model::Status;
use crate::retry::{self, Exhausted};

pub(super) fn run_job(shared: &Shared, job: Arc<DownloadJob>) {
    let key = job.key();
    let span = tracing::info_span!(
        "job",
        post_id = key.post_id,
        image_id = key.image_id,
        host = %job.image().host
    );
    let _enter = span.enter();

    let policy = shared.ctx.settings.get().retry_policy();
    match retry::run_with_retry(&policy, job.stop_token(), |_| job.attempt()) {
        Ok(attempts) => {
            tracing::debug!(attempts, status = ?job.last_status(), "job done");
        }
        Err(Exhausted { attempts, error }) => {
            tracing::error!(attempts, url = %job.image().url, "download failed: {}", error);
            if !job.is_stopped() {
                persist_status(shared, &job, Status::Error);
            }
        }
    }
    // Stopped while backing off after a failed attempt.
    if job.is_stopped() && !matches!(job.last_status(), Some(Status::Complete | Status::Stopped)) {
        persist_status(shared, &job, Status::Stopped);
    }

    // Bookkeeping first: once a stop sees the finished flag, the post must
    // already be released.
    shared.after_job_finish(&job);
    job.mark_finished();
}

fn persist_status(shared: &Shared, job: &DownloadJob, status: Status) {
    if let Err(e) = shared.ctx.store.update_image_status(job.image().id, status) {
        tracing::warn!("cannot persist status {}: {:#}", status, e);
    }
}
