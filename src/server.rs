//! Live reload notification and the local preview server.
//!
//! Stages report their written paths through the [`ReloadNotifier`]
//! contract. The watch entry point wires [`LiveReloadServer`], which serves
//! the output directory as static content and pushes refresh events to
//! connected browsers over a server-sent-events channel; one-shot builds
//! wire [`NullNotifier`] so the process can exit once the build is done.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::PipelineError;

/// Push-refresh collaborator invoked by stages after their write boundary.
pub trait ReloadNotifier: Send + Sync {
    /// Called once during build finalization, with the output root to serve
    fn start(&self, output_root: &Path) -> Result<(), PipelineError>;

    /// Push a refresh for the given written paths
    fn notify_changed(&self, paths: &[PathBuf]);
}

/// No-op notifier for one-shot builds and tests.
pub struct NullNotifier;

impl ReloadNotifier for NullNotifier {
    fn start(&self, _output_root: &Path) -> Result<(), PipelineError> {
        Ok(())
    }

    fn notify_changed(&self, _paths: &[PathBuf]) {}
}

const SSE_PATH: &str = "/__livereload";
const RELOAD_SNIPPET: &str =
    "<script>new EventSource(\"/__livereload\").onmessage = () => location.reload();</script>";

/// Static preview server with a server-sent-events refresh channel.
///
/// HTML responses get a reload snippet appended so connected browsers
/// re-fetch after every notification.
pub struct LiveReloadServer {
    port: u16,
    bound: Mutex<Option<u16>>,
    subscribers: Arc<Mutex<Vec<TcpStream>>>,
}

impl LiveReloadServer {
    /// `port` 0 asks the OS for a free port (used by tests)
    pub fn new(port: u16) -> Self {
        Self {
            port,
            bound: Mutex::new(None),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Port actually bound, once started
    pub fn local_port(&self) -> Option<u16> {
        *self.bound.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ReloadNotifier for LiveReloadServer {
    fn start(&self, output_root: &Path) -> Result<(), PipelineError> {
        let listener = TcpListener::bind(("127.0.0.1", self.port)).map_err(|source| {
            PipelineError::ServerBind {
                port: self.port,
                source,
            }
        })?;
        let port = listener
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(self.port);
        *self.bound.lock().unwrap_or_else(|e| e.into_inner()) = Some(port);

        let root = output_root.to_path_buf();
        let subscribers = Arc::clone(&self.subscribers);

        // Accept loop lives for the rest of the process; the watch session
        // owns the process lifetime.
        thread::spawn(move || {
            for stream in listener.incoming().filter_map(Result::ok) {
                let root = root.clone();
                let subscribers = Arc::clone(&subscribers);
                thread::spawn(move || handle_connection(stream, &root, &subscribers));
            }
        });

        Ok(())
    }

    fn notify_changed(&self, paths: &[PathBuf]) {
        let event = format!("event: reload\ndata: {} changed\n\n", paths.len());
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain_mut(|stream| stream.write_all(event.as_bytes()).is_ok());
    }
}

fn handle_connection(
    stream: TcpStream,
    root: &Path,
    subscribers: &Arc<Mutex<Vec<TcpStream>>>,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    });

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let target = match request_line.split_whitespace().nth(1) {
        Some(t) => t.to_string(),
        None => return,
    };

    // Drain headers up to the blank line
    let mut line = String::new();
    while reader.read_line(&mut line).is_ok() && line.trim() != "" {
        line.clear();
    }

    let mut stream = stream;
    let path = target.split('?').next().unwrap_or("/");

    if path == SSE_PATH {
        let header = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: keep-alive\r\n\r\n: connected\n\n";
        if stream.write_all(header.as_bytes()).is_ok() {
            let _ = stream.set_read_timeout(None);
            subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(stream);
        }
        return;
    }

    match read_static(root, path) {
        Some((body, content_type)) => {
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream
                .write_all(header.as_bytes())
                .and_then(|_| stream.write_all(&body));
        }
        None => {
            let _ = stream.write_all(
                b"HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\nConnection: close\r\n\r\nnot found",
            );
        }
    }
}

/// Resolve a request path under the output root and load it, rejecting
/// anything that would escape the served tree.
fn read_static(root: &Path, request_path: &str) -> Option<(Vec<u8>, &'static str)> {
    let relative = request_path.trim_start_matches('/');
    let relative = if relative.is_empty() {
        "index.html"
    } else {
        relative
    };

    let candidate = Path::new(relative);
    if candidate
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }

    let full = root.join(candidate);
    let mut body = std::fs::read(&full).ok()?;
    let content_type = content_type_for(&full);

    if content_type == "text/html" {
        body.extend_from_slice(RELOAD_SNIPPET.as_bytes());
    }

    Some((body, content_type))
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}
