//! HTTP response cache.
//!
//! # Data Flow
//! ```text
//! ResourceRequest
//!     → rfc::request_evaluate        not cacheable? forward (unsafe methods
//!                                    invalidate the key first)
//!     → heap lookup (key = address id, variant by Vary snapshot)
//!         fresh hit          → replay stored body (MemoryIstream)
//!         stale + validators → conditional request
//!                                  304: refresh document, replay body
//!                                  else: treat as miss
//!         miss               → next loader
//!     → rfc::response_evaluate       storable?
//!         no  → response passes through untouched
//!         yes → tee(body): first output to the caller,
//!                          second output collected by a store task;
//!               committed only after a complete, timely body within the
//!               size limit
//! ```
//!
//! # Design Decisions
//! - Stored documents are immutable and shared through `Arc`; a reader
//!   keeps its document alive while a newer one replaces it
//! - Concurrent misses for one key fetch independently
//! - A failed or aborted store never affects the caller's response

pub mod document;
pub mod heap;
pub mod rfc;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::http::StatusCode;
use axum::http::HeaderMap;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::CacheConfig;
use crate::istream::{sink_buffer, tee};
use crate::observability::metrics;
use crate::resource::{HttpResponse, LoadError, ResourceLoader, ResourceRequest};

pub use document::HttpCacheDocument;
pub use heap::CacheHeap;
use rfc::RequestInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub documents: usize,
}

pub struct HttpCache {
    heap: Arc<CacheHeap>,
    cacheable_size_limit: usize,
    store_timeout: Duration,
}

impl HttpCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            heap: Arc::new(CacheHeap::new(config.max_size)),
            cacheable_size_limit: config.cacheable_size_limit,
            store_timeout: config.store_timeout(),
        }
    }

    pub fn heap(&self) -> &CacheHeap {
        &self.heap
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.heap.size(),
            documents: self.heap.len(),
        }
    }

    /// Drop every document stored with `tag`.
    pub fn flush_tag(&self, tag: &str) -> usize {
        let count = self.heap.flush_tag(tag);
        tracing::info!(tag = %tag, count, "Flushed cache tag");
        count
    }

    pub fn flush_all(&self) -> usize {
        let count = self.heap.flush_all();
        tracing::info!(count, "Flushed cache");
        count
    }

    /// Serve `request` from the cache or through `next`.
    pub async fn request(
        &self,
        next: &dyn ResourceLoader,
        request: ResourceRequest,
    ) -> Result<HttpResponse, LoadError> {
        let key = request.address.id();

        let Some(info) = rfc::request_evaluate(
            &request.method,
            &request.headers,
            request.body.is_some(),
            request.address.is_remote(),
            request.address.has_query_string(),
        ) else {
            if rfc::invalidates(&request.method) && self.heap.remove(&key) > 0 {
                tracing::debug!(key = %key, method = %request.method, "Invalidated cached documents");
            }
            return next.send_request(request).await;
        };

        match self.heap.get(&key, &request.headers) {
            Some(doc) if info.only_if_cached || doc.is_fresh(SystemTime::now()) => {
                tracing::debug!(key = %key, "Cache hit");
                metrics::record_cache_hit();
                Ok(doc.response())
            }
            Some(doc) if doc.info.has_validators() => {
                self.revalidate(next, request, info, key, doc).await
            }
            Some(doc) => {
                self.heap.remove_document(&key, &doc);
                self.miss(next, request, info, key).await
            }
            None if info.only_if_cached => {
                metrics::record_cache_miss();
                Err(LoadError::NotCached)
            }
            None => self.miss(next, request, info, key).await,
        }
    }

    async fn miss(
        &self,
        next: &dyn ResourceLoader,
        request: ResourceRequest,
        info: RequestInfo,
        key: String,
    ) -> Result<HttpResponse, LoadError> {
        tracing::debug!(key = %key, "Cache miss");
        metrics::record_cache_miss();

        let request_headers = request.headers.clone();
        let tag = request.cache_tag.clone();
        let response = next.send_request(request).await?;
        Ok(self.store(key, &info, request_headers, tag, response))
    }

    async fn revalidate(
        &self,
        next: &dyn ResourceLoader,
        mut request: ResourceRequest,
        info: RequestInfo,
        key: String,
        doc: Arc<HttpCacheDocument>,
    ) -> Result<HttpResponse, LoadError> {
        let request_headers = request.headers.clone();
        let tag = request.cache_tag.clone();
        doc.conditional_headers(&mut request.headers);

        let response = next.send_request(request).await?;
        if response.status != StatusCode::NOT_MODIFIED {
            tracing::debug!(key = %key, status = %response.status, "Cached document replaced");
            self.heap.remove_document(&key, &doc);
            metrics::record_cache_miss();
            return Ok(self.store(key, &info, request_headers, tag, response));
        }

        tracing::debug!(key = %key, "Cached document revalidated");
        metrics::record_cache_hit();

        let refreshed = doc.refresh(&response.headers, doc.info.clone());
        match rfc::response_evaluate(&info, refreshed.status, &refreshed.headers, SystemTime::now()) {
            Some(new_info) => {
                let stored = self.heap.put(
                    &key,
                    HttpCacheDocument {
                        info: new_info,
                        ..refreshed
                    },
                );
                Ok(stored.response())
            }
            None => {
                self.heap.remove_document(&key, &doc);
                Ok(refreshed.response())
            }
        }
    }

    /// Pass `response` on, storing a copy if it is cacheable.
    fn store(
        &self,
        key: String,
        info: &RequestInfo,
        request_headers: HeaderMap,
        tag: Option<String>,
        response: HttpResponse,
    ) -> HttpResponse {
        let Some(response_info) =
            rfc::response_evaluate(info, response.status, &response.headers, SystemTime::now())
        else {
            return response;
        };

        let HttpResponse {
            status,
            headers,
            body,
        } = response;

        let Some(body) = body else {
            let doc = HttpCacheDocument::new(
                response_info,
                &request_headers,
                status,
                headers.clone(),
                Bytes::new(),
                tag,
            );
            metrics::record_cache_store(doc.size());
            self.heap.put(&key, doc);
            return HttpResponse::new(status, headers, None);
        };

        let limit = self.cacheable_size_limit;
        if body.available(false).is_some_and(|n| n > limit as u64) {
            return HttpResponse::new(status, headers, Some(body));
        }

        // the store branch is strong: it keeps reading after the client is gone
        let (first, second) = tee(body, false, false);
        let heap = self.heap.clone();
        let store_timeout = self.store_timeout;
        let stored_headers = headers.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(store_timeout, sink_buffer(Box::new(second), limit)).await {
                Ok(Ok(body)) => {
                    let doc = HttpCacheDocument::new(
                        response_info,
                        &request_headers,
                        status,
                        stored_headers,
                        body,
                        tag,
                    );
                    tracing::debug!(key = %key, size = doc.size(), "Stored response");
                    metrics::record_cache_store(doc.size());
                    heap.put(&key, doc);
                }
                Ok(Err(e)) => tracing::debug!(key = %key, error = %e, "Response not stored"),
                Err(_) => tracing::debug!(key = %key, "Timed out storing response"),
            }
        });

        HttpResponse::new(status, headers, Some(Box::new(first)))
    }

    /// Periodically drop expired documents until shutdown.
    pub async fn run_cleanup(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.heap.cleanup(SystemTime::now());
                    if removed > 0 {
                        tracing::debug!(count = removed, "Removed expired cache documents");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}
