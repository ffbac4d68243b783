//! Post-level side effects triggered by the engine.

use crate::model::Post;

/// Called under the engine's post lock, at most once per post per process,
/// when the first image of a post starts and `leave_thanks_on_start` is set.
pub trait PostHooks: Send + Sync {
    fn leave_thanks(&self, post: &Post);
}

/// Hook set that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl PostHooks for NoHooks {
    fn leave_thanks(&self, post: &Post) {
        tracing::debug!(post_id = post.id, "no thanks hook configured");
    }
}
