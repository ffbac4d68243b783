//! Process-local status store.

use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{mpsc, Mutex, MutexGuard, PoisonError};

use super::{StatusStore, StoreEvent};
use crate::model::{Image, ImageId, Post, PostId, Status};

#[derive(Default)]
struct Tables {
    posts: BTreeMap<PostId, Post>,
    images: BTreeMap<ImageId, Image>,
}

/// In-memory [`StatusStore`] with change subscriptions.
///
/// Ids come from monotonically increasing counters, one per table.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    post_seq: AtomicI64,
    image_seq: AtomicI64,
    subscribers: Mutex<Vec<mpsc::Sender<StoreEvent>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receives every change made after this call.
    pub fn subscribe(&self) -> mpsc::Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn publish(&self, event: StoreEvent) {
        let mut subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn insert_post(&self, source_id: &str, title: &str) -> Post {
        let id = self.post_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let post = Post {
            id,
            source_id: source_id.to_string(),
            title: title.to_string(),
            status: Status::Pending,
            folder_name: None,
        };
        self.tables().posts.insert(id, post.clone());
        post
    }

    pub fn insert_image(&self, post_id: PostId, url: &str, host: &str, index: u32) -> Result<Image> {
        let mut tables = self.tables();
        if !tables.posts.contains_key(&post_id) {
            bail!("cannot add image to unknown post {}", post_id);
        }
        let id = self.image_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let image = Image {
            id,
            post_id,
            url: url.to_string(),
            host: host.to_string(),
            index,
            current: 0,
            total: 0,
            status: Status::Pending,
        };
        tables.images.insert(id, image.clone());
        Ok(image)
    }

    pub fn find_image(&self, image_id: ImageId) -> Option<Image> {
        self.tables().images.get(&image_id).cloned()
    }

    fn with_image<F: FnOnce(&mut Image)>(&self, image_id: ImageId, f: F) -> Result<()> {
        {
            let mut tables = self.tables();
            let Some(image) = tables.images.get_mut(&image_id) else {
                bail!("image {} not found", image_id);
            };
            f(image);
        }
        self.publish(StoreEvent::ImageUpdated { image_id });
        Ok(())
    }
}

impl StatusStore for MemoryStore {
    fn update_image_status(&self, image_id: ImageId, status: Status) -> Result<()> {
        self.with_image(image_id, |i| i.status = status)
    }

    fn update_image_current(&self, image_id: ImageId, current: u64) -> Result<()> {
        self.with_image(image_id, |i| i.current = current)
    }

    fn update_image_total(&self, image_id: ImageId, total: u64) -> Result<()> {
        self.with_image(image_id, |i| i.total = total)
    }

    fn update_post_status(&self, post_id: PostId, status: Status) -> Result<()> {
        {
            let mut tables = self.tables();
            let Some(post) = tables.posts.get_mut(&post_id) else {
                bail!("post {} not found", post_id);
            };
            post.status = status;
        }
        self.publish(StoreEvent::PostStatus { post_id, status });
        Ok(())
    }

    fn update_post_folder_name(&self, post_id: PostId, folder_name: &str) -> Result<()> {
        let mut tables = self.tables();
        let Some(post) = tables.posts.get_mut(&post_id) else {
            bail!("post {} not found", post_id);
        };
        post.folder_name = Some(folder_name.to_string());
        Ok(())
    }

    fn find_post_by_id(&self, post_id: PostId) -> Result<Option<Post>> {
        Ok(self.tables().posts.get(&post_id).cloned())
    }

    fn find_images_by_post(&self, post_id: PostId) -> Result<Vec<Image>> {
        Ok(self
            .tables()
            .images
            .values()
            .filter(|i| i.post_id == post_id)
            .cloned()
            .collect())
    }

    fn find_images_by_post_incomplete(&self, post_id: PostId) -> Result<Vec<Image>> {
        Ok(self
            .tables()
            .images
            .values()
            .filter(|i| i.post_id == post_id && i.status != Status::Complete)
            .cloned()
            .collect())
    }

    fn find_all_posts(&self) -> Result<Vec<Post>> {
        Ok(self.tables().posts.values().cloned().collect())
    }

    fn stop_images_by_post_incomplete(&self, post_id: PostId) -> Result<usize> {
        let changed: Vec<ImageId> = {
            let mut tables = self.tables();
            tables
                .images
                .values_mut()
                .filter(|i| i.post_id == post_id && i.status != Status::Complete)
                .map(|i| {
                    i.status = Status::Stopped;
                    i.id
                })
                .collect()
        };
        for image_id in &changed {
            self.publish(StoreEvent::ImageUpdated { image_id: *image_id });
        }
        Ok(changed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential_per_table() {
        let store = MemoryStore::new();
        let p1 = store.insert_post("100", "first");
        let p2 = store.insert_post("200", "second");
        assert_eq!((p1.id, p2.id), (1, 2));
        let i1 = store.insert_image(p1.id, "https://a/1.jpg", "a", 1).unwrap();
        let i2 = store.insert_image(p2.id, "https://a/2.jpg", "a", 1).unwrap();
        assert_eq!((i1.id, i2.id), (1, 2));
        assert_eq!(i1.status, Status::Pending);
    }

    #[test]
    fn image_requires_existing_post() {
        let store = MemoryStore::new();
        assert!(store.insert_image(42, "https://a/1.jpg", "a", 1).is_err());
    }

    #[test]
    fn incomplete_filter_and_stop() {
        let store = MemoryStore::new();
        let post = store.insert_post("1", "p");
        let a = store.insert_image(post.id, "https://h/a", "h", 1).unwrap();
        let b = store.insert_image(post.id, "https://h/b", "h", 2).unwrap();
        let c = store.insert_image(post.id, "https://h/c", "h", 3).unwrap();
        store.update_image_status(a.id, Status::Complete).unwrap();
        store.update_image_status(b.id, Status::Error).unwrap();

        let incomplete = store.find_images_by_post_incomplete(post.id).unwrap();
        let ids: Vec<_> = incomplete.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![b.id, c.id]);

        assert_eq!(store.stop_images_by_post_incomplete(post.id).unwrap(), 2);
        assert_eq!(store.find_image(a.id).unwrap().status, Status::Complete);
        assert_eq!(store.find_image(b.id).unwrap().status, Status::Stopped);
        assert_eq!(store.find_image(c.id).unwrap().status, Status::Stopped);
    }

    #[test]
    fn subscribers_see_post_status_changes() {
        let store = MemoryStore::new();
        let post = store.insert_post("1", "p");
        let rx = store.subscribe();
        store.update_post_status(post.id, Status::Downloading).unwrap();
        store.update_post_status(post.id, Status::Complete).unwrap();
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                StoreEvent::PostStatus { post_id: post.id, status: Status::Downloading },
                StoreEvent::PostStatus { post_id: post.id, status: Status::Complete },
            ]
        );
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let store = MemoryStore::new();
        let post = store.insert_post("1", "p");
        drop(store.subscribe());
        store.update_post_status(post.id, Status::Downloading).unwrap();
        assert!(store.subscribers.lock().unwrap().is_empty());
    }

    #[test]
    fn folder_name_is_persisted() {
        let store = MemoryStore::new();
        let post = store.insert_post("1", "p");
        store.update_post_folder_name(post.id, "p").unwrap();
        let found = store.find_post_by_id(post.id).unwrap().unwrap();
        assert_eq!(found.folder_name.as_deref(), Some("p"));
        assert!(store.find_post_by_id(99).unwrap().is_none());
    }
}
