//! Document index: variants per key, size accounting, eviction.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::http::HeaderMap;
use dashmap::DashMap;

use super::document::HttpCacheDocument;
use crate::observability::metrics;

/// How long an expired document with validators is kept for revalidation.
pub const REVALIDATION_GRACE: Duration = Duration::from_secs(3600);

pub struct CacheHeap {
    documents: DashMap<String, Vec<Arc<HttpCacheDocument>>>,
    size: AtomicUsize,
    max_size: usize,
    sequence: AtomicU64,
}

impl CacheHeap {
    pub fn new(max_size: usize) -> Self {
        Self {
            documents: DashMap::new(),
            size: AtomicUsize::new(0),
            max_size,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn add_size(&self, n: usize) {
        let size = self.size.fetch_add(n, Ordering::Relaxed) + n;
        metrics::set_cache_size(size);
    }

    fn sub_size(&self, n: usize) {
        let previous = self
            .size
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |size| {
                Some(size.saturating_sub(n))
            })
            .unwrap_or_else(|size| size);
        metrics::set_cache_size(previous.saturating_sub(n));
    }

    /// The variant of `key` matching the request's Vary headers.
    pub fn get(&self, key: &str, request_headers: &HeaderMap) -> Option<Arc<HttpCacheDocument>> {
        self.documents
            .get(key)?
            .iter()
            .find(|doc| doc.vary_fits(request_headers))
            .cloned()
    }

    /// Store `document`, replacing the variant it was selected as.
    pub fn put(&self, key: &str, mut document: HttpCacheDocument) -> Arc<HttpCacheDocument> {
        document.sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let document = Arc::new(document);
        let size = document.size();

        {
            // account under the entry guard; removals only see the document after
            let mut variants = self.documents.entry(key.to_string()).or_default();
            let before = variants.len();
            let mut removed = 0;
            variants.retain(|doc| {
                let same = doc.same_variant(&document);
                if same {
                    removed += doc.size();
                }
                !same
            });
            debug_assert!(before - variants.len() <= 1);
            variants.push(document.clone());

            self.add_size(size);
            if removed > 0 {
                self.sub_size(removed);
            }
        }

        if self.size() > self.max_size {
            self.evict(SystemTime::now());
        }
        document
    }

    /// Remove one specific document, if it is still stored.
    pub fn remove_document(&self, key: &str, document: &Arc<HttpCacheDocument>) {
        let mut removed = 0;
        self.documents.remove_if_mut(key, |_, variants| {
            variants.retain(|doc| {
                let same = Arc::ptr_eq(doc, document);
                if same {
                    removed += doc.size();
                }
                !same
            });
            variants.is_empty()
        });
        if removed > 0 {
            self.sub_size(removed);
        }
    }

    /// Remove all variants of `key`.
    pub fn remove(&self, key: &str) -> usize {
        match self.documents.remove(key) {
            Some((_, variants)) => {
                let size = variants.iter().map(|doc| doc.size()).sum();
                self.sub_size(size);
                variants.len()
            }
            None => 0,
        }
    }

    /// Remove documents for which `predicate` holds; returns the count.
    fn remove_where(&self, predicate: impl Fn(&HttpCacheDocument) -> bool) -> usize {
        let mut count = 0;
        let mut size = 0;
        self.documents.retain(|_, variants| {
            variants.retain(|doc| {
                let remove = predicate(doc);
                if remove {
                    count += 1;
                    size += doc.size();
                }
                !remove
            });
            !variants.is_empty()
        });
        if size > 0 {
            self.sub_size(size);
        }
        count
    }

    pub fn flush_tag(&self, tag: &str) -> usize {
        self.remove_where(|doc| doc.tag.as_deref() == Some(tag))
    }

    pub fn flush_all(&self) -> usize {
        self.remove_where(|_| true)
    }

    /// Drop expired documents.  Those with validators stay for
    /// [`REVALIDATION_GRACE`] so they can still be revalidated.
    pub fn cleanup(&self, now: SystemTime) -> usize {
        self.remove_where(|doc| {
            if doc.is_fresh(now) {
                return false;
            }
            if doc.info.has_validators() {
                return now >= doc.info.expires + REVALIDATION_GRACE;
            }
            true
        })
    }

    /// Bring the heap below its size limit: expired documents first, then
    /// the oldest.
    fn evict(&self, now: SystemTime) {
        let expired = self.remove_where(|doc| !doc.is_fresh(now));
        if expired > 0 {
            tracing::debug!(count = expired, "Evicted expired cache documents");
        }
        if self.size() <= self.max_size {
            return;
        }

        let mut candidates: Vec<(u64, String, usize)> = self
            .documents
            .iter()
            .flat_map(|entry| {
                let key = entry.key().clone();
                entry
                    .value()
                    .iter()
                    .map(|doc| (doc.sequence, key.clone(), doc.size()))
                    .collect::<Vec<_>>()
            })
            .collect();
        candidates.sort_unstable_by_key(|(sequence, _, _)| *sequence);

        let mut excess = self.size().saturating_sub(self.max_size);
        let mut evicted = 0;
        for (sequence, key, size) in candidates {
            if excess == 0 {
                break;
            }
            let mut removed = 0;
            self.documents.remove_if_mut(&key, |_, variants| {
                variants.retain(|doc| {
                    let same = doc.sequence == sequence;
                    if same {
                        removed += doc.size();
                    }
                    !same
                });
                variants.is_empty()
            });
            if removed > 0 {
                self.sub_size(removed);
                excess = excess.saturating_sub(size);
                evicted += 1;
            }
        }
        tracing::debug!(count = evicted, "Evicted oldest cache documents");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::rfc::ResponseInfo;
    use axum::http::header::{HeaderName, HeaderValue};
    use axum::http::StatusCode;
    use bytes::Bytes;

    fn document(body: &'static [u8], tag: Option<&str>, vary: &[(&'static str, &'static str)]) -> HttpCacheDocument {
        let mut request = HeaderMap::new();
        for (name, value) in vary {
            request.insert(*name, HeaderValue::from_static(*value));
        }
        HttpCacheDocument::new(
            ResponseInfo {
                expires: SystemTime::now() + Duration::from_secs(60),
                last_modified: None,
                etag: None,
                vary: vary.iter().map(|(n, _)| HeaderName::from_static(*n)).collect(),
            },
            &request,
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from_static(body),
            tag.map(str::to_string),
        )
    }

    #[test]
    fn test_variants_and_replacement() {
        let heap = CacheHeap::new(1 << 20);
        heap.put("k", document(b"en", None, &[("accept-language", "en")]));
        heap.put("k", document(b"de", None, &[("accept-language", "de")]));
        assert_eq!(heap.len(), 2);

        let mut request = HeaderMap::new();
        request.insert("accept-language", HeaderValue::from_static("de"));
        assert_eq!(&heap.get("k", &request).unwrap().body[..], b"de");

        // same variant again replaces the old one
        let size = heap.size();
        heap.put("k", document(b"DE", None, &[("accept-language", "de")]));
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.size(), size);
        assert_eq!(&heap.get("k", &request).unwrap().body[..], b"DE");

        request.insert("accept-language", HeaderValue::from_static("fr"));
        assert!(heap.get("k", &request).is_none());
    }

    #[test]
    fn test_flush_tag() {
        let heap = CacheHeap::new(1 << 20);
        heap.put("a", document(b"1", Some("news"), &[]));
        heap.put("b", document(b"2", Some("sport"), &[]));
        heap.put("c", document(b"3", Some("news"), &[]));

        assert_eq!(heap.flush_tag("news"), 2);
        assert_eq!(heap.len(), 1);
        assert!(heap.get("b", &HeaderMap::new()).is_some());

        assert_eq!(heap.flush_all(), 1);
        assert!(heap.is_empty());
        assert_eq!(heap.size(), 0);
    }

    #[test]
    fn test_evicts_oldest_past_max_size() {
        let one = document(&[b'x'; 1000], None, &[]).size();
        let heap = CacheHeap::new(one * 2 + one / 2);

        heap.put("a", document(&[b'x'; 1000], None, &[]));
        heap.put("b", document(&[b'x'; 1000], None, &[]));
        heap.put("c", document(&[b'x'; 1000], None, &[]));

        assert!(heap.size() <= one * 2 + one / 2);
        assert!(heap.get("a", &HeaderMap::new()).is_none());
        assert!(heap.get("c", &HeaderMap::new()).is_some());
    }

    #[test]
    fn test_cleanup_keeps_revalidatable_documents() {
        let heap = CacheHeap::new(1 << 20);
        let mut stale = document(b"s", None, &[]);
        stale.info.expires = SystemTime::now() - Duration::from_secs(1);
        heap.put("plain", stale);

        let mut stale = document(b"e", None, &[]);
        stale.info.expires = SystemTime::now() - Duration::from_secs(1);
        stale.info.etag = Some(HeaderValue::from_static("\"e\""));
        heap.put("etag", stale);

        let now = SystemTime::now();
        assert_eq!(heap.cleanup(now), 1);
        assert!(heap.get("etag", &HeaderMap::new()).is_some());
        assert_eq!(heap.cleanup(now + REVALIDATION_GRACE), 1);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_size_accounting_under_concurrent_flush() {
        let heap = CacheHeap::new(1 << 30);

        std::thread::scope(|scope| {
            for writer in 0..4 {
                let heap = &heap;
                scope.spawn(move || {
                    for i in 0..500 {
                        heap.put(&format!("{writer}/{}", i % 50), document(b"body", Some("t"), &[]));
                    }
                });
            }
            for _ in 0..2 {
                let heap = &heap;
                scope.spawn(move || {
                    for _ in 0..500 {
                        heap.flush_tag("t");
                    }
                });
            }
        });

        let stored: usize = heap
            .documents
            .iter()
            .flat_map(|entry| entry.value().iter().map(|doc| doc.size()).collect::<Vec<_>>())
            .sum();
        assert_eq!(heap.size(), stored);

        heap.flush_all();
        assert_eq!(heap.size(), 0);
    }

    #[test]
    fn test_remove_document_only_removes_that_one() {
        let heap = CacheHeap::new(1 << 20);
        let old = heap.put("k", document(b"old", None, &[]));
        let new = heap.put("k", document(b"new", None, &[]));

        heap.remove_document("k", &old);
        assert!(Arc::ptr_eq(&heap.get("k", &HeaderMap::new()).unwrap(), &new));

        heap.remove_document("k", &new);
        assert!(heap.is_empty());
    }
}
