//! Host resolver interface: turns an image page URL into a file name and a
//! direct download URL.
//!
//! The download job only depends on [`HostResolver`] and knows nothing about
//! individual image hosts. Site-specific resolvers are registered in a
//! [`HostRegistry`] under the host tag stored on each image.

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::Image;

/// Result of resolving an image: remote name hint plus the URL to GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub name: String,
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("no resolver registered for host {0}")]
    UnsupportedHost(String),
    #[error("cannot derive an image name from {0}")]
    NoName(String),
    #[error("unrecognized content at {url}: {reason}")]
    Unrecognized { url: String, reason: String },
}

/// Trait implemented by host-specific resolvers. May perform network I/O.
pub trait HostResolver: Send + Sync {
    fn resolve(&self, image: &Image) -> Result<ResolvedImage, HostError>;
}

/// Resolver for URLs that already point at the image file.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectResolver;

impl HostResolver for DirectResolver {
    fn resolve(&self, image: &Image) -> Result<ResolvedImage, HostError> {
        let scheme = url::Url::parse(&image.url)
            .map(|u| u.scheme().to_string())
            .map_err(|e| HostError::Unrecognized {
                url: image.url.clone(),
                reason: e.to_string(),
            })?;
        if scheme != "http" && scheme != "https" {
            return Err(HostError::Unrecognized {
                url: image.url.clone(),
                reason: format!("unsupported scheme {scheme}"),
            });
        }
        let name = filename_from_url_path(&image.url)
            .ok_or_else(|| HostError::NoName(image.url.clone()))?;
        Ok(ResolvedImage {
            name,
            url: image.url.clone(),
        })
    }
}

/// Dispatches to a resolver by the image's host tag, with an optional fallback.
#[derive(Default, Clone)]
pub struct HostRegistry {
    by_host: HashMap<String, Arc<dyn HostResolver>>,
    fallback: Option<Arc<dyn HostResolver>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, host: &str, resolver: Arc<dyn HostResolver>) -> Self {
        self.by_host.insert(host.to_ascii_lowercase(), resolver);
        self
    }

    pub fn with_fallback(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.fallback = Some(resolver);
        self
    }
}

impl HostResolver for HostRegistry {
    fn resolve(&self, image: &Image) -> Result<ResolvedImage, HostError> {
        let resolver = self
            .by_host
            .get(&image.host.to_ascii_lowercase())
            .or(self.fallback.as_ref())
            .ok_or_else(|| HostError::UnsupportedHost(image.host.clone()))?;
        resolver.resolve(image)
    }
}

/// Host tag for a URL: lowercase host name without a leading `www.`.
pub fn host_tag(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// Last non-empty path segment of a URL, used as the name hint.
pub fn filename_from_url_path(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    if segment == "." || segment == ".." {
        return None;
    }
    Some(segment.to_string())
}
