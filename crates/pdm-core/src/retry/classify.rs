//! Classify job errors, HTTP status codes and curl errors into retry kinds.

use super::policy::ErrorKind;
use crate::job::{JobError, TransferError};

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        429 | 503 => ErrorKind::Throttled,
        _ => ErrorKind::Http(u16::try_from(code).unwrap_or(u16::MAX)),
    }
}

/// Classify a curl error for retry decisions.
///
/// Anything curl reports is a transport problem, so it is always retryable;
/// timeouts are only distinguished for logging.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    ErrorKind::Connection
}

/// Classify a failed download attempt.
pub fn classify(e: &JobError) -> ErrorKind {
    match e {
        JobError::Transfer(TransferError::Curl(ce)) => classify_curl_error(ce),
        JobError::Transfer(TransferError::Http(code)) => classify_http_status(*code),
        JobError::Transfer(TransferError::Partial { .. }) => ErrorKind::Connection,
        // Resolvers talk to the network too; a flaky page deserves another go.
        JobError::Host(_) => ErrorKind::Connection,
        JobError::Recognition(_)
        | JobError::Finalize { .. }
        | JobError::Store(_)
        | JobError::Io(_)
        | JobError::MissingPost(_)
        | JobError::Cancelled => ErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::HostError;
    use std::path::PathBuf;

    #[test]
    fn http_429_and_503_throttled() {
        assert_eq!(classify_http_status(429), ErrorKind::Throttled);
        assert_eq!(classify_http_status(503), ErrorKind::Throttled);
    }

    #[test]
    fn other_statuses_keep_their_code() {
        assert_eq!(classify_http_status(500), ErrorKind::Http(500));
        assert_eq!(classify_http_status(404), ErrorKind::Http(404));
    }

    #[test]
    fn short_body_and_host_errors_are_connection() {
        let partial = JobError::Transfer(TransferError::Partial {
            expected: 10,
            received: 4,
        });
        assert_eq!(classify(&partial), ErrorKind::Connection);
        let host = JobError::Host(HostError::NoName("https://x/".into()));
        assert_eq!(classify(&host), ErrorKind::Connection);
    }

    #[test]
    fn content_and_disk_errors_are_final() {
        assert_eq!(
            classify(&JobError::Recognition(PathBuf::from("/tmp/x.part"))),
            ErrorKind::Other
        );
        assert_eq!(classify(&JobError::MissingPost(3)), ErrorKind::Other);
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(classify(&JobError::Io(io)), ErrorKind::Other);
    }
}
