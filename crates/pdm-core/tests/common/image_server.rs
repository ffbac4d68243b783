//! Minimal HTTP/1.1 server for integration tests.
//!
//! Serves fixed bodies by request path, optionally slowly, and tracks how many
//! requests are being served at once. Unknown paths get 404.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Route {
    pub status: u16,
    pub body: Vec<u8>,
    /// Pause before each chunk of the body.
    pub chunk_delay: Duration,
    pub chunk_size: usize,
    /// If false, no Content-Length is sent and the body ends at connection close.
    pub content_length: bool,
}

impl Route {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            body,
            chunk_delay: Duration::ZERO,
            chunk_size: 16 * 1024,
            content_length: true,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::ok(b"nope".to_vec())
        }
    }

    pub fn slow(mut self, chunk_size: usize, chunk_delay: Duration) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.chunk_delay = chunk_delay;
        self
    }

    pub fn without_length(mut self) -> Self {
        self.content_length = false;
        self
    }
}

#[derive(Debug, Default)]
struct Stats {
    active: AtomicUsize,
    max_active: AtomicUsize,
    hits: Mutex<HashMap<String, usize>>,
}

pub struct ImageServer {
    base: String,
    routes: Arc<Mutex<HashMap<String, Route>>>,
    stats: Arc<Stats>,
}

impl ImageServer {
    /// Starts the server in a background thread; it runs until the process exits.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let routes: Arc<Mutex<HashMap<String, Route>>> = Arc::default();
        let stats: Arc<Stats> = Arc::default();
        {
            let routes = Arc::clone(&routes);
            let stats = Arc::clone(&stats);
            thread::spawn(move || {
                for stream in listener.incoming().flatten() {
                    let routes = Arc::clone(&routes);
                    let stats = Arc::clone(&stats);
                    thread::spawn(move || handle(stream, &routes, &stats));
                }
            });
        }
        Self {
            base: format!("http://127.0.0.1:{}", port),
            routes,
            stats,
        }
    }

    pub fn route(&self, path: &str, route: Route) -> String {
        self.routes.lock().unwrap().insert(path.to_string(), route);
        self.url(path)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Most requests ever served concurrently.
    pub fn max_concurrency(&self) -> usize {
        self.stats.max_active.load(Ordering::SeqCst)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.stats.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

struct Active<'a>(&'a Stats);

impl<'a> Active<'a> {
    fn enter(stats: &'a Stats) -> Self {
        let now = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_active.fetch_max(now, Ordering::SeqCst);
        Active(stats)
    }
}

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn handle(mut stream: TcpStream, routes: &Mutex<HashMap<String, Route>>, stats: &Stats) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    *stats.hits.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

    let route = routes
        .lock()
        .unwrap()
        .get(&path)
        .cloned()
        .unwrap_or_else(|| Route::status(404));

    let active = Active::enter(stats);
    let mut head = format!("HTTP/1.1 {} Test\r\nConnection: close\r\n", route.status);
    if route.content_length {
        head.push_str(&format!("Content-Length: {}\r\n", route.body.len()));
    }
    head.push_str("\r\n");
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }

    // The last byte goes out only after the request stops counting as
    // active, so a client can never finish while it is still counted.
    let (body, last) = match route.body.split_last() {
        Some((last, body)) => (body, Some(*last)),
        None => (&route.body[..], None),
    };
    for chunk in body.chunks(route.chunk_size) {
        if !route.chunk_delay.is_zero() {
            thread::sleep(route.chunk_delay);
        }
        if stream.write_all(chunk).is_err() {
            return;
        }
    }
    drop(active);
    if let Some(last) = last {
        let _ = stream.write_all(&[last]);
    }
    let _ = stream.flush();
}
