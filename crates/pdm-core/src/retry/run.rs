//! Retry loop: run a closure until success, a final error, or cancellation.

use std::time::Duration;

use super::classify;
use super::policy::{RetryDecision, RetryPolicy};
use crate::control::Latch;
use crate::job::JobError;

/// Last error of a failed retry loop and how many attempts were made.
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: u32,
    pub error: JobError,
}

/// Runs `f` until it succeeds or the retry policy says to stop.
///
/// On a retryable failure the backoff is spent waiting on `stop`, so setting
/// the latch ends the loop immediately. A stopped loop reports success:
/// the caller owns the stopped bookkeeping.
pub fn run_with_retry<F>(policy: &RetryPolicy, stop: &Latch, mut f: F) -> Result<u32, Exhausted>
where
    F: FnMut(u32) -> Result<(), JobError>,
{
    let mut attempt = 1u32;
    loop {
        match f(attempt) {
            Ok(()) => return Ok(attempt),
            Err(error) => {
                if stop.is_set() {
                    return Ok(attempt);
                }
                let kind = classify::classify(&error);
                match policy.decide(attempt, kind) {
                    RetryDecision::NoRetry => return Err(Exhausted { attempts: attempt, error }),
                    RetryDecision::RetryAfter(d) => {
                        tracing::debug!(attempt, ?kind, delay_ms = d.as_millis() as u64, "retrying: {}", error);
                        if wait_or_stopped(stop, d) {
                            return Ok(attempt);
                        }
                        attempt += 1;
                    }
                }
            }
        }
    }
}

fn wait_or_stopped(stop: &Latch, d: Duration) -> bool {
    if d.is_zero() {
        return stop.is_set();
    }
    stop.wait_timeout(d)
}
