//! Document fetching for metadata sources.
//!
//! Sources never talk to the network directly; they go through a [`Fetcher`], which keeps
//! HTTP out of the parsing code and lets tests serve documents from memory.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use parking_lot::RwLock;
use serde_json::Value;

/// File name appended to directory-style source URLs.
pub const DEFAULT_DOCUMENT: &str = "image.json";

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The server answered with a non-success status.
    Http { url: String, status: u16 },
    /// The request never produced a response.
    Transport { url: String, message: String },
    /// The body was not valid JSON.
    Decode { url: String, message: String },
    NotFound { url: String },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            FetchError::Http { url, .. }
            | FetchError::Transport { url, .. }
            | FetchError::Decode { url, .. }
            | FetchError::NotFound { url } => url,
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Http { url, status } => write!(f, "HTTP {status} for {url}"),
            FetchError::Transport { url, message } => {
                write!(f, "request to {url} failed: {message}")
            }
            FetchError::Decode { url, message } => {
                write!(f, "invalid JSON from {url}: {message}")
            }
            FetchError::NotFound { url } => write!(f, "not found: {url}"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Retrieves JSON documents by URL.
///
/// Implementations must be `Send + Sync` for use across async tasks.
/// Methods return boxed futures for dyn-compatibility.
pub trait Fetcher: Send + Sync {
    fn fetch_json(&self, url: &str) -> BoxFuture<'_, Result<Value, FetchError>>;
}

/// HTTP fetcher backed by a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch_json(&self, url: &str) -> BoxFuture<'_, Result<Value, FetchError>> {
        let url = url.to_string();
        Box::pin(async move {
            tracing::debug!("fetching {url}");
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| FetchError::Transport {
                    url: url.clone(),
                    message: e.to_string(),
                })?;

            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(FetchError::NotFound { url });
            }

            if !resp.status().is_success() {
                return Err(FetchError::Http {
                    url,
                    status: resp.status().as_u16(),
                });
            }

            resp.json::<Value>().await.map_err(|e| FetchError::Decode {
                url,
                message: e.to_string(),
            })
        })
    }
}

/// In-memory fetcher for tests or pre-bundled metadata.
///
/// Every request is recorded so callers can assert how often a URL was hit.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    documents: RwLock<HashMap<String, Value>>,
    failures: RwLock<HashMap<String, FetchError>>,
    requests: RwLock<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, document: Value) {
        self.documents.write().insert(url.into(), document);
    }

    /// Makes every request for `url` fail until [`MemoryFetcher::clear_failure`] is called.
    pub fn fail(&self, url: impl Into<String>, error: FetchError) {
        self.failures.write().insert(url.into(), error);
    }

    pub fn clear_failure(&self, url: &str) {
        self.failures.write().remove(url);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.read().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.read().iter().filter(|u| *u == url).count()
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch_json(&self, url: &str) -> BoxFuture<'_, Result<Value, FetchError>> {
        let url = url.to_string();
        Box::pin(async move {
            self.requests.write().push(url.clone());
            if let Some(err) = self.failures.read().get(&url) {
                return Err(err.clone());
            }
            self.documents
                .read()
                .get(&url)
                .cloned()
                .ok_or(FetchError::NotFound { url })
        })
    }
}

/// A source URL split into the document to fetch and the directory tiles live under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrl {
    pub url: String,
    pub base_url: String,
}

/// Appends [`DEFAULT_DOCUMENT`] to directory and extension-less URLs and derives the base
/// directory. Query strings are preserved on the document URL only.
pub fn normalize_source_url(raw: &str) -> SourceUrl {
    let (path, query) = match raw.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (raw, None),
    };

    let path = if path.ends_with('/') {
        format!("{path}{DEFAULT_DOCUMENT}")
    } else if path.to_ascii_lowercase().ends_with(".json") {
        path.to_string()
    } else {
        format!("{path}/{DEFAULT_DOCUMENT}")
    };

    let base_url = match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    };
    let url = match query {
        Some(q) => format!("{path}?{q}"),
        None => path,
    };
    SourceUrl { url, base_url }
}
