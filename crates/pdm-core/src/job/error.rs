use std::io;
use std::path::PathBuf;

use crate::model::PostId;
use crate::resolver::HostError;

/// Failure of the network transfer itself.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Curl(#[from] curl::Error),
    #[error("HTTP {0}")]
    Http(u32),
    #[error("short body: received {received} of {expected} bytes")]
    Partial { expected: u64, received: u64 },
}

/// Failure of one download attempt.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),
    #[error("host resolution failed: {0}")]
    Host(#[from] HostError),
    #[error("no known image format in {}", .0.display())]
    Recognition(PathBuf),
    #[error("cannot finalize {}: {source}", path.display())]
    Finalize {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("post {0} not found")]
    MissingPost(PostId),
    #[error("stopped")]
    Cancelled,
}

impl From<curl::Error> for JobError {
    fn from(e: curl::Error) -> Self {
        JobError::Transfer(TransferError::Curl(e))
    }
}
