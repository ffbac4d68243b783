//! Single GET of a resolved image into its temp file.

use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str;
use std::time::Duration;

use super::{DownloadJob, JobError, TransferError};

/// Chunk size for both curl's receive buffer and the file writer.
pub const BUFFER_SIZE: usize = 8192;

fn is_success(code: u32) -> bool {
    (200..300).contains(&code)
}

/// Status code from an `HTTP/x y reason` line.
fn parse_status_line(line: &str) -> Option<u32> {
    line.strip_prefix("HTTP/")?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

fn parse_content_length(line: &str) -> Option<u64> {
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return None;
    }
    value.trim().parse().ok()
}

/// Streams `url` into `temp`, updating the job's counters chunk by chunk.
///
/// Only the final (post-redirect) 2xx response body is written. Returns the
/// number of body bytes received. A stop request aborts the transfer from
/// inside curl's callbacks and surfaces as [`JobError::Cancelled`].
pub(super) fn fetch(job: &DownloadJob, url: &str, temp: &Path) -> Result<u64, JobError> {
    let mut out = BufWriter::with_capacity(BUFFER_SIZE, File::create(temp)?);

    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.referer(&job.image.url)?;
    easy.buffer_size(BUFFER_SIZE)?;
    easy.connect_timeout(Duration::from_secs(30))?;
    easy.low_speed_limit(1024)?;
    easy.low_speed_time(Duration::from_secs(60))?;
    easy.progress(true)?;

    // Reset on every status line so redirects do not leak their headers.
    let status: Cell<Option<u32>> = Cell::new(None);
    let declared: Cell<Option<u64>> = Cell::new(None);
    let started = Cell::new(false);
    let failure: RefCell<Option<JobError>> = RefCell::new(None);

    let performed = {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            let Ok(line) = str::from_utf8(data) else {
                return true;
            };
            let line = line.trim_end();
            if let Some(code) = parse_status_line(line) {
                status.set(Some(code));
                declared.set(None);
            } else if let Some(len) = parse_content_length(line) {
                declared.set(Some(len));
            }
            true
        })?;
        transfer.write_function(|data| {
            if job.is_stopped() {
                return Ok(0);
            }
            if !status.get().is_some_and(is_success) {
                // Body of a redirect or an error page.
                return Ok(data.len());
            }
            let first = !started.replace(true);
            match accept_chunk(job, &mut out, data, first, declared.get()) {
                Ok(()) => Ok(data.len()),
                Err(e) => {
                    *failure.borrow_mut() = Some(e);
                    Ok(0)
                }
            }
        })?;
        transfer.progress_function(|_, _, _, _| !job.is_stopped())?;
        transfer.perform()
    };

    if let Some(e) = failure.into_inner() {
        return Err(e);
    }
    if job.is_stopped() {
        return Err(JobError::Cancelled);
    }
    performed.map_err(TransferError::from)?;
    out.flush()?;

    let code = easy.response_code()?;
    if !is_success(code) {
        return Err(TransferError::Http(code).into());
    }

    let received = job.current();
    match job.total() {
        0 => job.set_total(received)?,
        expected if expected != received => {
            return Err(TransferError::Partial { expected, received }.into());
        }
        _ => {}
    }
    Ok(received)
}

fn accept_chunk<W: Write>(
    job: &DownloadJob,
    out: &mut W,
    data: &[u8],
    first: bool,
    declared: Option<u64>,
) -> Result<(), JobError> {
    if first {
        if let Some(total) = declared {
            job.set_total(total)?;
        }
    }
    let n = data.len() as u64;
    let total = job.total();
    if total > 0 && job.current() + n > total {
        return Err(TransferError::Partial {
            expected: total,
            received: job.current() + n,
        }
        .into());
    }
    out.write_all(data)?;
    job.advance(n)?;
    job.ctx.speed.add_bytes(n);
    Ok(())
}
