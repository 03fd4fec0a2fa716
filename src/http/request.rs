//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request ID (UUID)
//! - Turn an incoming request into a [`ResourceRequest`] for the loaders
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing and sent back
//!   to the client
//! - The request body is streamed, never buffered here
//! - Hop-by-hop headers end at the gateway; the client address is
//!   appended to `X-Forwarded-For`

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::Request;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use super::client::strip_hop_by_hop;
use crate::istream::{BoxIstream, StreamIstream};
use crate::resource::ResourceRequest;
use crate::routing::RouteMatch;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Assigns an `x-request-id` to requests that carry none.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Copies the request's `x-request-id` onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}

/// Access to the request ID set by [`set_request_id_layer`].
pub trait RequestIdExt {
    fn request_id(&self) -> &str;
}

impl RequestIdExt for HeaderMap {
    fn request_id(&self) -> &str {
        self.get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
    }
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> &str {
        self.headers().request_id()
    }
}

fn has_body(headers: &HeaderMap) -> bool {
    if headers.contains_key(header::TRANSFER_ENCODING) {
        return true;
    }
    content_length(headers).is_some_and(|n| n > 0)
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Build the loader request for a routed client request.
pub fn resource_request(
    request: Request<Body>,
    route: RouteMatch,
    client: Option<SocketAddr>,
) -> ResourceRequest {
    let (parts, body) = request.into_parts();
    let mut headers = parts.headers;

    let body: Option<BoxIstream> = if has_body(&headers) {
        let length = if headers.contains_key(header::TRANSFER_ENCODING) {
            None
        } else {
            content_length(&headers)
        };
        Some(Box::new(StreamIstream::new(body.into_data_stream(), length)))
    } else {
        None
    };

    strip_hop_by_hop(&mut headers);
    if let Some(client) = client {
        let forwarded = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(previous) => format!("{previous}, {}", client.ip()),
            None => client.ip().to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    ResourceRequest {
        method: parts.method,
        address: route.address,
        headers,
        body,
        cache_tag: route.cache_tag,
        sticky: route.sticky,
    }
}
