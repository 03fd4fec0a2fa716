//! Serve regular files from disk.

use std::fs::{File, Metadata};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{Method, StatusCode};

use super::{HttpResponse, LoadError};
use crate::istream::{BoxIstream, FileIstream};

fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("pdf") => "application/pdf",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

fn etag(metadata: &Metadata) -> String {
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("\"{:x}-{:x}\"", mtime, metadata.len())
}

/// Does the request's validator match the file?
fn not_modified(request: &HeaderMap, etag: &str, modified: Option<SystemTime>) -> bool {
    if let Some(value) = request.get(header::IF_NONE_MATCH) {
        return value
            .to_str()
            .map(|v| v.split(',').any(|t| t.trim() == "*" || t.trim() == etag))
            .unwrap_or(false);
    }

    let since = request
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| httpdate::parse_http_date(v).ok());
    match (since, modified) {
        (Some(since), Some(modified)) => {
            // HTTP dates have whole-second resolution
            let modified = httpdate::parse_http_date(&httpdate::fmt_http_date(modified))
                .unwrap_or(modified);
            modified <= since
        }
        _ => false,
    }
}

/// Build the response for `path`.
pub fn load_file(
    method: &Method,
    path: &Path,
    request_headers: &HeaderMap,
) -> Result<HttpResponse, LoadError> {
    if method != Method::GET && method != Method::HEAD {
        let mut headers = HeaderMap::new();
        headers.insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        return Ok(HttpResponse::new(
            StatusCode::METHOD_NOT_ALLOWED,
            headers,
            None,
        ));
    }

    let io_error = |source| LoadError::Io {
        path: path.display().to_string(),
        source,
    };

    let file = File::open(path).map_err(io_error)?;
    let metadata = file.metadata().map_err(io_error)?;
    if !metadata.is_file() {
        return Err(LoadError::NotFound(path.display().to_string()));
    }

    let etag = etag(&metadata);
    let modified = metadata.modified().ok();

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&etag) {
        headers.insert(header::ETAG, value);
    }
    if let Some(modified) = modified {
        if let Ok(value) = HeaderValue::from_str(&httpdate::fmt_http_date(modified)) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }

    if not_modified(request_headers, &etag, modified) {
        return Ok(HttpResponse::new(StatusCode::NOT_MODIFIED, headers, None));
    }

    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type(path)));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));

    let body: Option<BoxIstream> = if method == Method::HEAD {
        None
    } else {
        Some(Box::new(FileIstream::new(file, path, 0, Some(metadata.len()))))
    };
    Ok(HttpResponse::new(StatusCode::OK, headers, body))
}
