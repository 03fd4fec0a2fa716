//! Response handling and transformation.
//!
//! # Responsibilities
//! - Turn a loader response into an axum response with a streamed body
//! - Map loader errors to appropriate HTTP status codes
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Hop-by-hop headers stripped automatically
//! - Backend timeouts result in 504 Gateway Timeout

use axum::body::Body;
use axum::http::header::{self, HeaderValue};
use axum::response::{IntoResponse, Response};

use super::client::strip_hop_by_hop;
use crate::istream::IstreamBody;
use crate::resource::{HttpResponse, LoadError};

pub fn into_response(response: HttpResponse) -> Response {
    let HttpResponse {
        status,
        mut headers,
        body,
    } = response;
    strip_hop_by_hop(&mut headers);

    let body = match body {
        Some(body) => {
            let body = IstreamBody::new(body);
            match body.size_hint_exact() {
                Some(length) => {
                    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
                }
                None => {
                    headers.remove(header::CONTENT_LENGTH);
                }
            }
            Body::from_stream(body)
        }
        None => Body::empty(),
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

pub fn error_response(error: &LoadError) -> Response {
    let status = error.status();
    let message = status.canonical_reason().unwrap_or("Error");
    (status, message).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::istream::MemoryIstream;
    use axum::http::{HeaderMap, StatusCode};

    #[tokio::test]
    async fn test_streamed_body() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        let response = into_response(HttpResponse::new(
            StatusCode::OK,
            headers,
            Some(Box::new(MemoryIstream::new("streamed"))),
        ));

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "8");
        assert!(!response.headers().contains_key(header::CONNECTION));

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"streamed");
    }

    #[test]
    fn test_error_status() {
        let response = error_response(&LoadError::NotFound("/x".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
