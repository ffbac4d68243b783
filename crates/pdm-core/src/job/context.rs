use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use super::JobError;
use crate::config::SettingsHandle;
use crate::hooks::{NoHooks, PostHooks};
use crate::layout;
use crate::model::{Post, PostId, Status};
use crate::resolver::HostResolver;
use crate::speed::SpeedMeter;
use crate::store::StatusStore;

/// Post-level bookkeeping guarded by the single post lock.
#[derive(Debug, Default)]
struct PostLedger {
    thanked: HashSet<PostId>,
}

/// Collaborators shared by every download job of a scheduler.
pub struct JobContext {
    pub store: Arc<dyn StatusStore>,
    pub resolver: Arc<dyn HostResolver>,
    pub hooks: Arc<dyn PostHooks>,
    pub speed: Arc<SpeedMeter>,
    pub settings: SettingsHandle,
    pub download_root: PathBuf,
    /// One lock for all posts. Never held together with any other lock.
    post_lock: Mutex<PostLedger>,
}

impl JobContext {
    pub fn new(
        store: Arc<dyn StatusStore>,
        resolver: Arc<dyn HostResolver>,
        settings: SettingsHandle,
        download_root: PathBuf,
    ) -> Self {
        Self {
            store,
            resolver,
            hooks: Arc::new(NoHooks),
            speed: Arc::new(SpeedMeter::new()),
            settings,
            download_root,
            post_lock: Mutex::new(PostLedger::default()),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn PostHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_speed(mut self, speed: Arc<SpeedMeter>) -> Self {
        self.speed = speed;
        self
    }

    fn post(&self, post_id: PostId) -> Result<Post, JobError> {
        self.store
            .find_post_by_id(post_id)?
            .ok_or(JobError::MissingPost(post_id))
    }

    /// Moves the post to `DOWNLOADING` unless it already shows activity.
    pub fn mark_post_downloading(&self, post_id: PostId) -> Result<(), JobError> {
        let _ledger = self.post_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let post = self.post(post_id)?;
        if !post.status.is_active() {
            self.store.update_post_status(post_id, Status::Downloading)?;
        }
        Ok(())
    }

    /// Returns the post's folder, assigning its name and creating it on first use.
    ///
    /// Also fires the one-time thanks hook when configured.
    pub fn prepare_post_folder(&self, post_id: PostId) -> Result<PathBuf, JobError> {
        let mut ledger = self.post_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let post = self.post(post_id)?;
        let folder_name = match &post.folder_name {
            Some(name) => name.clone(),
            None => {
                let name = layout::post_folder_name(&post);
                self.store.update_post_folder_name(post_id, &name)?;
                name
            }
        };
        let folder = self.download_root.join(&folder_name);
        fs::create_dir_all(&folder)?;

        if self.settings.get().leave_thanks_on_start && ledger.thanked.insert(post_id) {
            self.hooks.leave_thanks(&post);
        }
        Ok(folder)
    }
}
