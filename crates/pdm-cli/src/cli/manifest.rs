//! TOML manifest listing the posts for `pdm run`.
//!
//! ```toml
//! [[posts]]
//! source_id = "48213"
//! title = "Harbour at night"
//! images = [
//!     "https://img.example.com/a/IMG_0001_jpg",
//!     { url = "https://pixhost.example/show/2", host = "pixhost" },
//! ]
//! ```

use anyhow::{bail, Context, Result};
use pdm_core::model::PostId;
use pdm_core::resolver::host_tag;
use pdm_core::store::MemoryStore;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub posts: Vec<ManifestPost>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestPost {
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub title: String,
    pub images: Vec<ManifestImage>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ManifestImage {
    Url(String),
    Detailed { url: String, host: Option<String> },
}

impl ManifestImage {
    pub fn url(&self) -> &str {
        match self {
            ManifestImage::Url(url) | ManifestImage::Detailed { url, .. } => url,
        }
    }

    /// Explicit host tag, else the one derived from the URL.
    pub fn host(&self) -> Result<String> {
        if let ManifestImage::Detailed { host: Some(host), .. } = self {
            return Ok(host.to_ascii_lowercase());
        }
        match host_tag(self.url()) {
            Some(host) => Ok(host),
            None => bail!("cannot derive a host from {:?}", self.url()),
        }
    }
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("read manifest {}", path.display()))?;
        Self::from_toml_str(&data).with_context(|| format!("parse manifest {}", path.display()))
    }

    pub fn from_toml_str(data: &str) -> Result<Self> {
        Ok(toml::from_str(data)?)
    }

    /// Creates the posts and their images in `store`; returns the new post ids.
    pub fn insert_into(&self, store: &MemoryStore) -> Result<Vec<PostId>> {
        let mut ids = Vec::with_capacity(self.posts.len());
        for post in &self.posts {
            // Validate every image before creating anything for the post.
            let hosts = post
                .images
                .iter()
                .map(ManifestImage::host)
                .collect::<Result<Vec<_>>>()?;
            let created = store.insert_post(&post.source_id, &post.title);
            for (i, (image, host)) in post.images.iter().zip(&hosts).enumerate() {
                store.insert_image(created.id, image.url(), host, i as u32 + 1)?;
            }
            ids.push(created.id);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdm_core::store::StatusStore;

    const SAMPLE: &str = r#"
        [[posts]]
        source_id = "48213"
        title = "Harbour at night"
        images = [
            "https://www.img.example.com/a/IMG_0001_jpg",
            { url = "https://pixhost.example/show/2", host = "PixHost" },
        ]

        [[posts]]
        images = ["https://cdn.example.org/x.png"]
    "#;

    #[test]
    fn parses_plain_and_detailed_images() {
        let manifest = Manifest::from_toml_str(SAMPLE).unwrap();
        assert_eq!(manifest.posts.len(), 2);
        let first = &manifest.posts[0];
        assert_eq!(first.title, "Harbour at night");
        assert_eq!(first.images[0].host().unwrap(), "img.example.com");
        assert_eq!(first.images[1].host().unwrap(), "pixhost");
        assert_eq!(manifest.posts[1].source_id, "");
    }

    #[test]
    fn inserts_posts_with_indexed_images() {
        let manifest = Manifest::from_toml_str(SAMPLE).unwrap();
        let store = MemoryStore::new();
        let ids = manifest.insert_into(&store).unwrap();
        assert_eq!(ids.len(), 2);
        let images = store.find_images_by_post(ids[0]).unwrap();
        let indexes: Vec<u32> = images.iter().map(|i| i.index).collect();
        assert_eq!(indexes, vec![1, 2]);
        assert_eq!(images[1].host, "pixhost");
    }

    #[test]
    fn rejects_url_without_host() {
        let manifest = Manifest::from_toml_str("[[posts]]\nimages = [\"not a url\"]\n").unwrap();
        let store = MemoryStore::new();
        assert!(manifest.insert_into(&store).is_err());
        assert!(store.find_all_posts().unwrap().is_empty());
    }

    #[test]
    fn empty_manifest_has_no_posts() {
        assert!(Manifest::from_toml_str("").unwrap().posts.is_empty());
    }
}
