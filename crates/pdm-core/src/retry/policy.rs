use std::time::Duration;

/// High-level classification of an error for retry purposes.
///
/// Callers map HTTP status codes, curl errors, resolver and filesystem
/// failures into these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation timed out (connect/read).
    Timeout,
    /// Server asked us to slow down (e.g. 429, 503).
    Throttled,
    /// Network-level failure (connection reset, DNS, short body, host lookup).
    Connection,
    /// Any other non-2xx response.
    Http(u16),
    /// Deterministic failure (unrecognized content, disk, store); retrying cannot help.
    Other,
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff policy with caps.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay for backoff.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Compute the next backoff delay for a given attempt and error kind.
    ///
    /// `attempt` is 1-based (1 = first attempt). Returns `RetryDecision::NoRetry`
    /// when we should stop retrying.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }

        match kind {
            ErrorKind::Other => RetryDecision::NoRetry,
            ErrorKind::Timeout | ErrorKind::Connection | ErrorKind::Http(_) => {
                RetryDecision::RetryAfter(self.backoff(attempt, 1))
            }
            // Back off harder when the host says so.
            ErrorKind::Throttled => RetryDecision::RetryAfter(self.backoff(attempt, 2)),
        }
    }

    /// base * factor * 2^(attempt-1), capped at `max_delay`.
    fn backoff(&self, attempt: u32, factor: u32) -> Duration {
        let exp = 1u32 << attempt.saturating_sub(1).min(8);
        self.base_delay
            .saturating_mul(exp.saturating_mul(factor))
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delay(d: RetryDecision) -> Duration {
        match d {
            RetryDecision::RetryAfter(d) => d,
            RetryDecision::NoRetry => panic!("expected retry"),
        }
    }

    #[test]
    fn no_retry_for_other() {
        let p = RetryPolicy::default();
        assert_eq!(p.decide(1, ErrorKind::Other), RetryDecision::NoRetry);
    }

    #[test]
    fn exponential_backoff_grows_and_is_capped() {
        let p = RetryPolicy {
            max_attempts: 20,
            ..RetryPolicy::default()
        };
        let d1 = delay(p.decide(1, ErrorKind::Timeout));
        let d2 = delay(p.decide(2, ErrorKind::Timeout));
        assert_eq!(d1, Duration::from_millis(500));
        assert_eq!(d2, Duration::from_secs(1));
        assert_eq!(delay(p.decide(15, ErrorKind::Connection)), p.max_delay);
    }

    #[test]
    fn throttling_waits_longer() {
        let p = RetryPolicy::default();
        assert!(delay(p.decide(1, ErrorKind::Throttled)) > delay(p.decide(1, ErrorKind::Http(404))));
    }

    #[test]
    fn respects_max_attempts() {
        let p = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert!(matches!(p.decide(1, ErrorKind::Http(500)), RetryDecision::RetryAfter(_)));
        assert!(matches!(p.decide(2, ErrorKind::Http(500)), RetryDecision::RetryAfter(_)));
        assert_eq!(p.decide(3, ErrorKind::Http(500)), RetryDecision::NoRetry);
    }

    #[test]
    fn single_attempt_never_retries() {
        let p = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        assert_eq!(p.decide(1, ErrorKind::Timeout), RetryDecision::NoRetry);
    }
}
