//! Resource addressing and loading.
//!
//! # Data Flow
//! ```text
//! routing → ResourceAddress (local file | HTTP cluster)
//!     → ResourceRequest { method, address, headers, body, cache_tag, sticky }
//!     → ResourceLoader::send_request
//!         CachedResourceLoader (cached.rs)
//!             → HttpCache (hit: stored document, miss: next loader + store)
//!         DirectResourceLoader (direct.rs)
//!             → local.rs (FileIstream)
//!             → http::client (balanced, pooled HTTP/1.1)
//!     → HttpResponse { status, headers, body: Istream }
//! ```
//!
//! # Design Decisions
//! - One trait for all loaders so the cache wraps any of them
//! - Cancellation is dropping the returned future
//! - Errors carry enough kind information to pick a status code

pub mod cached;
pub mod direct;
pub mod local;

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::{HeaderMap, Method, StatusCode};
use futures_util::future::BoxFuture;

use crate::http::client::ClientError;
use crate::istream::BoxIstream;
use crate::load_balancer::AddressList;

pub use cached::CachedResourceLoader;
pub use direct::DirectResourceLoader;

/// Forward to a backend cluster.
#[derive(Debug, Clone)]
pub struct HttpAddress {
    pub cluster: String,
    pub addresses: Arc<AddressList>,
    /// Path and query sent upstream.
    pub path: String,
}

/// Where a request is served from.
#[derive(Debug, Clone)]
pub enum ResourceAddress {
    Local { path: PathBuf },
    Http(HttpAddress),
}

impl ResourceAddress {
    /// Stable identity, used for cache keys.
    pub fn id(&self) -> String {
        match self {
            ResourceAddress::Local { path } => format!("file:{}", path.display()),
            ResourceAddress::Http(http) => format!("http://{}{}", http.cluster, http.path),
        }
    }

    pub fn has_query_string(&self) -> bool {
        match self {
            ResourceAddress::Local { .. } => false,
            ResourceAddress::Http(http) => http.path.contains('?'),
        }
    }

    /// Served from another host, as opposed to a local file.
    pub fn is_remote(&self) -> bool {
        matches!(self, ResourceAddress::Http(_))
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

pub struct ResourceRequest {
    pub method: Method,
    pub address: ResourceAddress,
    pub headers: HeaderMap,
    pub body: Option<BoxIstream>,
    /// Tag attached to a cached response, for `FLUSH_HTTP_CACHE tag`.
    pub cache_tag: Option<String>,
    /// Value selecting a sticky node.
    pub sticky: Option<String>,
}

impl ResourceRequest {
    pub fn new(method: Method, address: ResourceAddress) -> Self {
        Self {
            method,
            address,
            headers: HeaderMap::new(),
            body: None,
            cache_tag: None,
            sticky: None,
        }
    }
}

pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<BoxIstream>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Option<BoxIstream>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, HeaderMap::new(), None)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body.is_some())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to open {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Client(#[from] ClientError),

    /// `only-if-cached` request that missed the cache.
    #[error("not in cache")]
    NotCached,
}

impl LoadError {
    pub fn status(&self) -> StatusCode {
        match self {
            LoadError::NotFound(_) => StatusCode::NOT_FOUND,
            LoadError::Io { source, .. } => match source.kind() {
                io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
                io::ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            LoadError::Client(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            LoadError::Client(_) => StatusCode::BAD_GATEWAY,
            LoadError::NotCached => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

pub type LoadFuture<'a> = BoxFuture<'a, Result<HttpResponse, LoadError>>;

/// Anything that turns a [`ResourceRequest`] into a response.
pub trait ResourceLoader: Send + Sync {
    fn send_request(&self, request: ResourceRequest) -> LoadFuture<'_>;
}
