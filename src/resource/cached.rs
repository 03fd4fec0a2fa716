//! Loader consulting the HTTP cache before the next loader.

use std::sync::Arc;

use super::{LoadFuture, ResourceLoader, ResourceRequest};
use crate::cache::HttpCache;

pub struct CachedResourceLoader {
    cache: Arc<HttpCache>,
    next: Arc<dyn ResourceLoader>,
}

impl CachedResourceLoader {
    pub fn new(cache: Arc<HttpCache>, next: Arc<dyn ResourceLoader>) -> Self {
        Self { cache, next }
    }

    pub fn cache(&self) -> &Arc<HttpCache> {
        &self.cache
    }
}

impl ResourceLoader for CachedResourceLoader {
    fn send_request(&self, request: ResourceRequest) -> LoadFuture<'_> {
        Box::pin(self.cache.request(self.next.as_ref(), request))
    }
}
