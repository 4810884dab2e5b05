//! Document loading: existence probe, download with progress, parse
//!
//! The download and parse run on a helper thread. The calling thread
//! relays progress and waits on a hard deadline; when the deadline passes
//! the load fails with [`LoadError::Timeout`] and any late result is
//! dropped with the channel.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use flume::RecvTimeoutError;
use log::{debug, info, warn};

use super::renderer::{DocumentEngine, DocumentInfo, EngineError, Rasterizer};

const READ_CHUNK: usize = 64 * 1024;
/// Upper bound on the buffer reserved from a declared content length
const MAX_PREALLOC: usize = READ_CHUNK * 64;

/// Terminal failures of a load attempt; the loader never retries itself
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("document not found at {url}{}", status_suffix(.status))]
    NotFound { url: String, status: Option<u16> },

    #[error("network error loading {url}: {message}")]
    Network { url: String, message: String },

    #[error("loading {url} timed out after {}s", .after.as_secs())]
    Timeout { url: String, after: Duration },

    #[error("{url} is not a valid document: {message}")]
    Parse { url: String, message: String },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl LoadError {
    /// The resolved locator the failure refers to
    pub fn url(&self) -> &str {
        match self {
            Self::NotFound { url, .. }
            | Self::Network { url, .. }
            | Self::Timeout { url, .. }
            | Self::Parse { url, .. } => url,
        }
    }
}

/// Where document bytes come from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    Http(String),
    File(PathBuf),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(url) => f.write_str(url),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Resolve a locator against the API base URL.
///
/// `http(s)://` URLs are used as-is and `file://` URLs and existing paths
/// load from disk. Anything else, including `/media/...` style paths the
/// backend hands out, is a URL relative to `base_url`.
pub fn resolve_locator(locator: &str, base_url: &str) -> Source {
    let locator = locator.trim();
    if locator.starts_with("http://") || locator.starts_with("https://") {
        return Source::Http(locator.to_string());
    }
    if let Some(path) = locator.strip_prefix("file://") {
        return Source::File(PathBuf::from(path));
    }
    let path = PathBuf::from(locator);
    if path.is_file() {
        return Source::File(path);
    }
    Source::Http(format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        locator.trim_start_matches('/')
    ))
}

/// A parsed document, cheap to clone and share with worker threads
#[derive(Clone)]
pub struct DocumentHandle {
    url: String,
    bytes: Arc<[u8]>,
    info: Arc<DocumentInfo>,
    engine: Arc<dyn DocumentEngine>,
}

impl DocumentHandle {
    pub fn new(
        url: impl Into<String>,
        bytes: Arc<[u8]>,
        info: DocumentInfo,
        engine: Arc<dyn DocumentEngine>,
    ) -> Self {
        Self {
            url: url.into(),
            bytes,
            info: Arc::new(info),
            engine,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn page_count(&self) -> usize {
        self.info.page_count
    }

    /// Intrinsic size of `page` (1-based)
    pub fn page_size(&self, page: usize) -> Option<(f32, f32)> {
        page.checked_sub(1)
            .and_then(|index| self.info.page_sizes.get(index).copied())
    }

    /// Open a rasterizer for the calling thread
    pub fn open_rasterizer(&self) -> Result<Box<dyn Rasterizer>, EngineError> {
        self.engine.open(Arc::clone(&self.bytes))
    }
}

impl fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("url", &self.url)
            .field("bytes", &self.bytes.len())
            .field("page_count", &self.info.page_count)
            .finish()
    }
}

enum LoadMessage {
    Progress(f32),
    Done(Result<DocumentHandle, LoadError>),
}

/// Fetches and parses documents
#[derive(Clone)]
pub struct DocumentLoader {
    engine: Arc<dyn DocumentEngine>,
    base_url: String,
    timeout: Duration,
}

impl DocumentLoader {
    pub fn new(engine: Arc<dyn DocumentEngine>, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            engine,
            base_url: base_url.into(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn resolve(&self, locator: &str) -> Source {
        resolve_locator(locator, &self.base_url)
    }

    /// Load `locator`, reporting download progress in [0, 1]
    pub fn load(
        &self,
        locator: &str,
        mut on_progress: impl FnMut(f32),
    ) -> Result<DocumentHandle, LoadError> {
        let source = self.resolve(locator);
        let url = source.to_string();
        info!("Loading document from {url}");

        let deadline = Instant::now() + self.timeout;
        let client = self.http_client(&source, &url)?;
        probe(&source, &url, client.as_ref())?;

        let (tx, rx) = flume::unbounded();
        let engine = Arc::clone(&self.engine);
        let worker_url = url.clone();
        thread::spawn(move || {
            let result = fetch(&source, &worker_url, client.as_ref(), |fraction| {
                let _ = tx.send(LoadMessage::Progress(fraction));
            })
            .and_then(|bytes| parse(engine, &worker_url, bytes));
            let _ = tx.send(LoadMessage::Done(result));
        });

        loop {
            match rx.recv_deadline(deadline) {
                Ok(LoadMessage::Progress(fraction)) => on_progress(fraction),
                Ok(LoadMessage::Done(result)) => {
                    if let Ok(handle) = &result {
                        on_progress(1.0);
                        info!("Loaded {url}: {} pages", handle.page_count());
                    }
                    return result;
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!("Load of {url} exceeded {:?}", self.timeout);
                    return Err(LoadError::Timeout {
                        url,
                        after: self.timeout,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(LoadError::Network {
                        url,
                        message: "loader thread exited".to_string(),
                    });
                }
            }
        }
    }

    fn http_client(
        &self,
        source: &Source,
        url: &str,
    ) -> Result<Option<reqwest::blocking::Client>, LoadError> {
        if matches!(source, Source::File(_)) {
            return Ok(None);
        }
        reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map(Some)
            .map_err(|e| LoadError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}

fn network_error(url: &str, err: impl fmt::Display) -> LoadError {
    LoadError::Network {
        url: url.to_string(),
        message: err.to_string(),
    }
}

fn probe(
    source: &Source,
    url: &str,
    client: Option<&reqwest::blocking::Client>,
) -> Result<(), LoadError> {
    match (source, client) {
        (Source::Http(target), Some(client)) => {
            let response = client.head(target).send().map_err(|e| network_error(url, e))?;
            let status = response.status();
            debug!("HEAD {target} -> {status}");
            if status.is_success() {
                Ok(())
            } else {
                Err(LoadError::NotFound {
                    url: url.to_string(),
                    status: Some(status.as_u16()),
                })
            }
        }
        (Source::File(path), _) => match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(LoadError::NotFound {
                url: url.to_string(),
                status: None,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(LoadError::NotFound {
                url: url.to_string(),
                status: None,
            }),
            Err(e) => Err(network_error(url, e)),
        },
        (Source::Http(_), None) => Err(network_error(url, "no HTTP client")),
    }
}

fn fetch(
    source: &Source,
    url: &str,
    client: Option<&reqwest::blocking::Client>,
    on_progress: impl FnMut(f32),
) -> Result<Vec<u8>, LoadError> {
    match (source, client) {
        (Source::Http(target), Some(client)) => {
            let response = client.get(target).send().map_err(|e| network_error(url, e))?;
            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(LoadError::NotFound {
                    url: url.to_string(),
                    status: Some(status.as_u16()),
                });
            }
            if !status.is_success() {
                return Err(network_error(url, format!("HTTP {status}")));
            }
            let total = response.content_length();
            read_with_progress(response, total, on_progress).map_err(|e| network_error(url, e))
        }
        (Source::File(path), _) => {
            let file = File::open(path).map_err(|e| network_error(url, e))?;
            let total = file.metadata().ok().map(|m| m.len());
            read_with_progress(file, total, on_progress).map_err(|e| network_error(url, e))
        }
        (Source::Http(_), None) => Err(network_error(url, "no HTTP client")),
    }
}

fn read_with_progress(
    mut reader: impl Read,
    total: Option<u64>,
    mut on_progress: impl FnMut(f32),
) -> std::io::Result<Vec<u8>> {
    let declared = usize::try_from(total.unwrap_or(0)).unwrap_or(usize::MAX);
    let mut bytes = Vec::with_capacity(declared.min(MAX_PREALLOC));
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..read]);
        if let Some(total) = total.filter(|t| *t > 0) {
            on_progress((bytes.len() as f32 / total as f32).min(1.0));
        }
    }
    Ok(bytes)
}

fn parse(
    engine: Arc<dyn DocumentEngine>,
    url: &str,
    bytes: Vec<u8>,
) -> Result<DocumentHandle, LoadError> {
    let info = engine.parse(&bytes).map_err(|e| LoadError::Parse {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    Ok(DocumentHandle::new(url, Arc::from(bytes), info, engine))
}
