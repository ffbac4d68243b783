//! `pdm run` – download every post of a manifest and exit when all are finalized.

use anyhow::Result;
use pdm_core::config::{Settings, SettingsHandle};
use pdm_core::control::default_control_socket_path;
use pdm_core::job::JobContext;
use pdm_core::model::{PostId, Status};
use pdm_core::resolver::{DirectResolver, HostRegistry};
use pdm_core::scheduler::Scheduler;
use pdm_core::speed::SpeedMeter;
use pdm_core::store::{MemoryStore, StatusStore, StoreEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cli::control_socket;
use crate::cli::manifest::Manifest;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default, Clone)]
pub struct RunOverrides {
    pub dir: Option<PathBuf>,
    pub per_host: Option<usize>,
    pub total: Option<usize>,
}

impl RunOverrides {
    pub fn apply(self, cfg: &mut Settings) {
        if let Some(dir) = self.dir {
            cfg.download_dir = Some(dir);
        }
        if let Some(n) = self.per_host {
            cfg.max_threads_per_host = n;
        }
        if let Some(n) = self.total {
            cfg.max_total_threads = n;
        }
    }
}

pub async fn run_manifest(mut cfg: Settings, manifest_path: &Path, overrides: RunOverrides) -> Result<()> {
    overrides.apply(&mut cfg);
    let download_root = match &cfg.download_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };

    let manifest = Manifest::load(manifest_path)?;
    let store = Arc::new(MemoryStore::new());
    let post_ids = manifest.insert_into(&store)?;
    if post_ids.is_empty() {
        println!("No posts in manifest.");
        return Ok(());
    }
    let events = store.subscribe();

    let speed = Arc::new(SpeedMeter::new());
    // Site-specific resolvers register here; anything else is fetched as-is.
    let resolver = HostRegistry::new().with_fallback(Arc::new(DirectResolver));
    let ctx = JobContext::new(
        store.clone(),
        Arc::new(resolver),
        SettingsHandle::new(cfg),
        download_root.clone(),
    )
    .with_speed(Arc::clone(&speed));
    let scheduler = Arc::new(Scheduler::start(Arc::new(ctx))?);

    let socket_path = default_control_socket_path().ok();
    let listener = match &socket_path {
        Some(path) => match control_socket::spawn_control_listener(Arc::clone(&scheduler), path) {
            Ok(handle) => {
                tracing::debug!(path = %path.display(), "control socket listening");
                Some(handle)
            }
            Err(e) => {
                tracing::warn!("control socket unavailable: {:#}", e);
                None
            }
        },
        None => None,
    };

    for &post_id in &post_ids {
        scheduler.submit(post_id)?;
    }
    println!(
        "Downloading {} post(s) into {}",
        post_ids.len(),
        download_root.display()
    );

    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    loop {
        ticker.tick().await;
        for event in events.try_iter() {
            if let StoreEvent::PostStatus { post_id, status } = event {
                print_post_line(store.as_ref(), post_id, status);
            }
        }
        if scheduler.total_pending() == 0 {
            break;
        }
        println!(
            "  {:.2} MiB/s  {} running  {:.1} MiB total",
            speed.sample_bytes_per_sec() / 1_048_576.0,
            scheduler.running_count(),
            speed.total_bytes() as f64 / 1_048_576.0
        );
    }

    if let Some(handle) = listener {
        handle.abort();
    }
    if let Some(path) = &socket_path {
        let _ = std::fs::remove_file(path);
    }
    let shutting_down = Arc::clone(&scheduler);
    tokio::task::spawn_blocking(move || shutting_down.shutdown()).await?;

    print_summary(store.as_ref(), &post_ids)?;
    Ok(())
}

fn print_post_line(store: &dyn StatusStore, post_id: PostId, status: Status) {
    let title = store
        .find_post_by_id(post_id)
        .ok()
        .flatten()
        .map(|p| p.title)
        .unwrap_or_default();
    println!("post {:<4} {:<12} {}", post_id, status, title);
}

fn print_summary(store: &dyn StatusStore, post_ids: &[PostId]) -> Result<()> {
    println!("{:<6} {:<12} {:<8} {}", "POST", "STATUS", "IMAGES", "FOLDER");
    let mut complete = 0;
    for &post_id in post_ids {
        let Some(post) = store.find_post_by_id(post_id)? else {
            continue;
        };
        let images = store.find_images_by_post(post_id)?;
        let done = images.iter().filter(|i| i.status == Status::Complete).count();
        if post.status == Status::Complete {
            complete += 1;
        }
        println!(
            "{:<6} {:<12} {:<8} {}",
            post.id,
            post.status,
            format!("{}/{}", done, images.len()),
            post.folder_name.as_deref().unwrap_or("-")
        );
    }
    tracing::info!("run finished: {} of {} post(s) complete", complete, post_ids.len());
    Ok(())
}
