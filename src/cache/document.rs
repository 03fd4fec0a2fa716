//! A stored response.

use std::time::SystemTime;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use bytes::Bytes;

use super::rfc::{self, ResponseInfo};
use crate::istream::MemoryIstream;
use crate::resource::HttpResponse;

/// Immutable once stored; refreshing after a revalidation builds a new
/// document sharing the body.
#[derive(Debug)]
pub struct HttpCacheDocument {
    pub info: ResponseInfo,
    /// Request header values the response was selected by.
    pub vary: Vec<(HeaderName, Option<HeaderValue>)>,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub tag: Option<String>,
    /// Insertion order, for evicting the oldest documents first.
    pub(crate) sequence: u64,
}

impl HttpCacheDocument {
    pub fn new(
        info: ResponseInfo,
        request_headers: &HeaderMap,
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        tag: Option<String>,
    ) -> Self {
        let vary = rfc::vary_snapshot(&info.vary, request_headers);
        Self {
            info,
            vary,
            status,
            headers,
            body,
            tag,
            sequence: 0,
        }
    }

    pub fn vary_fits(&self, request_headers: &HeaderMap) -> bool {
        rfc::vary_fits(&self.vary, request_headers)
    }

    /// Same variant as `other`: the headers it was selected by are equal.
    pub fn same_variant(&self, other: &HttpCacheDocument) -> bool {
        self.vary == other.vary
    }

    pub fn is_fresh(&self, now: SystemTime) -> bool {
        now < self.info.expires
    }

    /// Accounted size: body plus headers.
    pub fn size(&self) -> usize {
        let headers: usize = self
            .headers
            .iter()
            .map(|(name, value)| name.as_str().len() + value.len() + 4)
            .sum();
        self.body.len() + headers + 64
    }

    /// Conditional request headers for revalidating this document.
    pub fn conditional_headers(&self, headers: &mut HeaderMap) {
        if let Some(etag) = &self.info.etag {
            headers.insert(header::IF_NONE_MATCH, etag.clone());
        }
        if let Some(modified) = &self.info.last_modified {
            headers.insert(header::IF_MODIFIED_SINCE, modified.clone());
        }
    }

    /// The document after a `304 Not Modified`: headers updated from the
    /// 304 response, new freshness information, same body.
    pub fn refresh(&self, not_modified: &HeaderMap, info: ResponseInfo) -> Self {
        let mut headers = self.headers.clone();
        for name in not_modified.keys() {
            if *name == header::CONTENT_LENGTH || *name == header::TRANSFER_ENCODING {
                continue;
            }
            headers.remove(name);
            for value in not_modified.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        Self {
            info,
            vary: self.vary.clone(),
            status: self.status,
            headers,
            body: self.body.clone(),
            tag: self.tag.clone(),
            sequence: self.sequence,
        }
    }

    /// A response replaying the stored body.
    pub fn response(&self) -> HttpResponse {
        let mut headers = self.headers.clone();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(self.body.len()));
        HttpResponse::new(
            self.status,
            headers,
            Some(Box::new(MemoryIstream::new(self.body.clone()))),
        )
    }
}
