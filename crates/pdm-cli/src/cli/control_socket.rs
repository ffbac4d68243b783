//! Control socket: server (during `pdm run`) and client (`pdm stop|restart|running`).
//! Protocol: one request line, one reply line.
//! Requests: "stop <id|all>", "restart <id|all>", "running".

use anyhow::{bail, Context, Result};
use pdm_core::model::PostId;
use pdm_core::scheduler::Scheduler;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    Post(PostId),
}

impl Target {
    fn ids(&self) -> Option<Vec<PostId>> {
        match self {
            Target::All => None,
            Target::Post(id) => Some(vec![*id]),
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Target::All);
        }
        s.parse::<PostId>()
            .map(Target::Post)
            .map_err(|_| format!("expected a post id or `all`, got {:?}", s))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => f.write_str("all"),
            Target::Post(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    Stop(Target),
    Restart(Target),
    Running,
}

impl ControlRequest {
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts.next()?;
        let arg = parts.next();
        if parts.next().is_some() {
            return None;
        }
        match (verb, arg) {
            ("stop", Some(t)) => t.parse().ok().map(ControlRequest::Stop),
            ("restart", Some(t)) => t.parse().ok().map(ControlRequest::Restart),
            ("running", None) => Some(ControlRequest::Running),
            _ => None,
        }
    }

    pub fn to_line(&self) -> String {
        match self {
            ControlRequest::Stop(t) => format!("stop {}\n", t),
            ControlRequest::Restart(t) => format!("restart {}\n", t),
            ControlRequest::Running => "running\n".to_string(),
        }
    }

    /// Runs the request against the scheduler; blocks while a stop waits for jobs.
    pub fn execute(&self, scheduler: &Scheduler) -> String {
        match self {
            ControlRequest::Stop(t) => {
                let ids = t.ids();
                format!("ok stopped {}", scheduler.stop_all(ids.as_deref()))
            }
            ControlRequest::Restart(t) => {
                let ids = t.ids();
                format!("ok restarted {}", scheduler.restart_all(ids.as_deref()))
            }
            ControlRequest::Running => format!("running {}", scheduler.running_count()),
        }
    }
}

/// Spawns a task that serves control requests on `path` until aborted.
pub fn spawn_control_listener(
    scheduler: Arc<Scheduler>,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("bind control socket {}", path.display()))?;

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let scheduler = Arc::clone(&scheduler);
                    tokio::spawn(async move {
                        if let Err(e) = serve(stream, scheduler).await {
                            tracing::debug!("control connection: {:#}", e);
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn serve(stream: UnixStream, scheduler: Arc<Scheduler>) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        let reply = match ControlRequest::parse(&line) {
            Some(request) => {
                tracing::info!(?request, "control request");
                let scheduler = Arc::clone(&scheduler);
                tokio::task::spawn_blocking(move || request.execute(&scheduler)).await?
            }
            None => format!("error unknown request {:?}", line.trim()),
        };
        write.write_all(reply.as_bytes()).await?;
        write.write_all(b"\n").await?;
    }
    Ok(())
}

/// Sends one request to the running `pdm run` and returns its reply line.
pub async fn send_request(socket_path: &Path, request: ControlRequest) -> Result<String> {
    if !socket_path.exists() {
        bail!(
            "no running `pdm run` (control socket {} not found)",
            socket_path.display()
        );
    }
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("connect {}", socket_path.display()))?;
    let (read, mut write) = stream.into_split();
    write.write_all(request.to_line().as_bytes()).await?;
    write.shutdown().await?;
    let reply = BufReader::new(read)
        .lines()
        .next_line()
        .await?
        .context("control socket closed without a reply")?;
    Ok(reply)
}
