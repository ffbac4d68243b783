//! Posts, images and their shared status vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type PostId = i64;
pub type ImageId = i64;

/// Status shared by posts and images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Pending,
    Downloading,
    Partial,
    Complete,
    Error,
    Stopped,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "PENDING",
            Status::Downloading => "DOWNLOADING",
            Status::Partial => "PARTIAL",
            Status::Complete => "COMPLETE",
            Status::Error => "ERROR",
            Status::Stopped => "STOPPED",
        }
    }

    /// Terminal for an image: nothing will touch it again until a restart.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Complete | Status::Error | Status::Stopped)
    }

    /// A post that already shows activity.
    pub fn is_active(self) -> bool {
        matches!(self, Status::Downloading | Status::Partial)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Status::Pending),
            "DOWNLOADING" => Ok(Status::Downloading),
            "PARTIAL" => Ok(Status::Partial),
            "COMPLETE" => Ok(Status::Complete),
            "ERROR" => Ok(Status::Error),
            "STOPPED" => Ok(Status::Stopped),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// A source item holding several images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: PostId,
    /// Identifier of the post on the site it was taken from.
    pub source_id: String,
    pub title: String,
    pub status: Status,
    /// Destination folder (relative to the download root), assigned on first download.
    pub folder_name: Option<String>,
}

/// One downloadable file of a post.
///
/// Refers to its post by id only; the store owns the lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: ImageId,
    pub post_id: PostId,
    pub url: String,
    /// Host tag: selects the resolver and the concurrency budget.
    pub host: String,
    /// 1-based position inside the post, used for ordered naming.
    pub index: u32,
    pub current: u64,
    pub total: u64,
    pub status: Status,
}

impl Image {
    pub fn key(&self) -> JobKey {
        JobKey {
            post_id: self.post_id,
            image_id: self.id,
        }
    }
}

/// Identity of a download: at most one live job exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey {
    pub post_id: PostId,
    pub image_id: ImageId,
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "post {} / image {}", self.post_id, self.image_id)
    }
}

/// Aggregate status of a post once no job for it remains.
///
/// Returns `None` for a post without images.
pub fn finalize_status(images: &[Image]) -> Option<Status> {
    if images.is_empty() {
        return None;
    }
    if images.iter().all(|i| i.status == Status::Complete) {
        return Some(Status::Complete);
    }
    if images.iter().any(|i| i.status == Status::Error) {
        return Some(Status::Error);
    }
    if images.iter().any(|i| i.status == Status::Stopped) {
        return Some(Status::Stopped);
    }
    Some(Status::Partial)
}
