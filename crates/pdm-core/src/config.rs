use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Size of the worker pool and the hard ceiling on concurrent downloads.
pub const MAX_POOL_SIZE: usize = 12;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per image (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.5 = 500ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 0.5,
            max_delay_secs: 30,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        let defaults = RetryPolicy::default();
        let base = if cfg.base_delay_secs == 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(cfg.base_delay_secs).unwrap_or(defaults.base_delay)
        };
        RetryPolicy {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: base,
            max_delay: Duration::from_secs(cfg.max_delay_secs),
        }
    }
}

/// Global configuration loaded from `~/.config/pdm/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root directory under which one folder per post is created.
    /// `None` means the working directory of the process.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Maximum concurrent downloads against a single host.
    #[serde(default = "default_max_threads_per_host")]
    pub max_threads_per_host: usize,
    /// Maximum concurrent downloads overall; 0 means the pool size.
    #[serde(default)]
    pub max_total_threads: usize,
    /// Prefix final file names with the zero-padded image index.
    #[serde(default)]
    pub force_order: bool,
    /// Call the post hook once when the first image of a post starts.
    #[serde(default)]
    pub leave_thanks_on_start: bool,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_max_threads_per_host() -> usize {
    2
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_dir: None,
            max_threads_per_host: default_max_threads_per_host(),
            max_total_threads: 0,
            force_order: false,
            leave_thanks_on_start: false,
            retry: None,
        }
    }
}

impl Settings {
    /// Global concurrency ceiling: the pool size, lowered by `max_total_threads` when set.
    pub fn effective_max_total(&self, pool_size: usize) -> usize {
        if self.max_total_threads == 0 {
            pool_size
        } else {
            pool_size.min(self.max_total_threads)
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
            .as_ref()
            .map(RetryPolicy::from)
            .unwrap_or_default()
    }
}

/// Shared, live-updatable view of [`Settings`].
///
/// The scheduler reads it on every admission pass, so a changed cap takes
/// effect on the next poll without restarting anything.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<Settings>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Snapshot of the current settings.
    pub fn get(&self) -> Settings {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update<F: FnOnce(&mut Settings)>(&self, f: F) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("pdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<Settings> {
    load_or_init_at(&config_path()?)
}

pub fn load_or_init_at(path: &Path) -> Result<Settings> {
    if !path.exists() {
        let default_cfg = Settings::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path)?;
    let cfg: Settings = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_values() {
        let cfg = Settings::default();
        assert_eq!(cfg.max_threads_per_host, 2);
        assert_eq!(cfg.max_total_threads, 0);
        assert!(!cfg.force_order);
        assert!(!cfg.leave_thanks_on_start);
        assert!(cfg.download_dir.is_none());
    }

    #[test]
    fn effective_total_uses_pool_when_unset() {
        let mut cfg = Settings::default();
        assert_eq!(cfg.effective_max_total(MAX_POOL_SIZE), 12);
        cfg.max_total_threads = 4;
        assert_eq!(cfg.effective_max_total(MAX_POOL_SIZE), 4);
        cfg.max_total_threads = 40;
        assert_eq!(cfg.effective_max_total(MAX_POOL_SIZE), 12);
    }

    #[test]
    fn settings_toml_custom_values() {
        let toml = r#"
            download_dir = "/srv/pictures"
            max_threads_per_host = 1
            max_total_threads = 6
            force_order = true

            [retry]
            max_attempts = 4
            base_delay_secs = 0.25
            max_delay_secs = 10
        "#;
        let cfg: Settings = toml::from_str(toml).unwrap();
        assert_eq!(cfg.download_dir.as_deref(), Some(Path::new("/srv/pictures")));
        assert_eq!(cfg.max_threads_per_host, 1);
        assert_eq!(cfg.max_total_threads, 6);
        assert!(cfg.force_order);
        assert!(!cfg.leave_thanks_on_start);
        let policy = cfg.retry_policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn missing_retry_section_falls_back_to_defaults() {
        let cfg: Settings = toml::from_str("max_threads_per_host = 3").unwrap();
        assert!(cfg.retry.is_none());
        assert_eq!(cfg.retry_policy().max_attempts, RetryPolicy::default().max_attempts);
    }

    #[test]
    fn omitted_per_host_cap_defaults_to_two() {
        let cfg: Settings = toml::from_str("force_order = true").unwrap();
        assert_eq!(cfg.max_threads_per_host, 2);
        assert!(cfg.force_order);
    }

    #[test]
    fn unusable_base_delay_falls_back_to_default() {
        let default_base = RetryPolicy::default().base_delay;
        for secs in [1e30, -1.0, f64::NAN, f64::INFINITY] {
            let policy = RetryPolicy::from(&RetryConfig {
                base_delay_secs: secs,
                ..RetryConfig::default()
            });
            assert_eq!(policy.base_delay, default_base, "base_delay_secs = {secs}");
        }
        let zero = RetryPolicy::from(&RetryConfig {
            base_delay_secs: 0.0,
            ..RetryConfig::default()
        });
        assert_eq!(zero.base_delay, Duration::ZERO);
    }

    #[test]
    fn load_or_init_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = load_or_init_at(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.max_threads_per_host, 2);

        fs::write(&path, "max_threads_per_host = 5\nleave_thanks_on_start = true\n").unwrap();
        let reloaded = load_or_init_at(&path).unwrap();
        assert_eq!(reloaded.max_threads_per_host, 5);
        assert!(reloaded.leave_thanks_on_start);
    }

    #[test]
    fn handle_updates_are_visible_to_clones() {
        let handle = SettingsHandle::new(Settings::default());
        let other = handle.clone();
        handle.update(|s| s.max_threads_per_host = 7);
        assert_eq!(other.get().max_threads_per_host, 7);
    }
}
