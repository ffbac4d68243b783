//! Status persistence seen by the engine.
//!
//! The scheduler and download jobs never create or delete posts and images;
//! they only read them and write status/progress through [`StatusStore`].
//! Every call is an independent unit: no transaction spans two calls.

mod memory;

use anyhow::Result;

use crate::model::{Image, ImageId, JobKey, Post, PostId, Status};

pub use memory::MemoryStore;

/// Change notification published by stores that support subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    ImageUpdated { image_id: ImageId },
    PostStatus { post_id: PostId, status: Status },
}

/// Synchronous persistence collaborator.
pub trait StatusStore: Send + Sync {
    fn update_image_status(&self, image_id: ImageId, status: Status) -> Result<()>;
    fn update_image_current(&self, image_id: ImageId, current: u64) -> Result<()>;
    fn update_image_total(&self, image_id: ImageId, total: u64) -> Result<()>;
    fn update_post_status(&self, post_id: PostId, status: Status) -> Result<()>;
    fn update_post_folder_name(&self, post_id: PostId, folder_name: &str) -> Result<()>;

    fn find_post_by_id(&self, post_id: PostId) -> Result<Option<Post>>;
    fn find_images_by_post(&self, post_id: PostId) -> Result<Vec<Image>>;
    /// Images of the post whose status is anything but `COMPLETE`.
    fn find_images_by_post_incomplete(&self, post_id: PostId) -> Result<Vec<Image>>;
    fn find_all_posts(&self) -> Result<Vec<Post>>;

    /// Marks every non-complete image of the post `STOPPED`; returns how many changed.
    fn stop_images_by_post_incomplete(&self, post_id: PostId) -> Result<usize>;

    /// Called once per finished job, after its final status was written.
    fn on_job_finished(&self, _key: JobKey) -> Result<()> {
        Ok(())
    }
}
