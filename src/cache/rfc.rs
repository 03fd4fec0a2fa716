//! Caching rules from RFC 7234: which requests may use the cache, which
//! responses may be stored, and for how long.

use std::time::{Duration, SystemTime};

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};

/// Upper bound for heuristic freshness derived from `Last-Modified`.
const MAX_HEURISTIC: Duration = Duration::from_secs(3600);

/// What the cache learned about a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Served by a remote server, which must send a `Date` header.
    pub is_remote: bool,
    pub only_if_cached: bool,
    /// Heuristic freshness is not allowed for URIs with a query string.
    pub has_query_string: bool,
}

/// Caching metadata of a storable response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInfo {
    pub expires: SystemTime,
    pub last_modified: Option<HeaderValue>,
    pub etag: Option<HeaderValue>,
    /// Request headers the response varies on, lowercase.
    pub vary: Vec<HeaderName>,
}

impl ResponseInfo {
    pub fn has_validators(&self) -> bool {
        self.last_modified.is_some() || self.etag.is_some()
    }
}

fn directives(headers: &HeaderMap, name: HeaderName) -> impl Iterator<Item = String> + '_ {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty())
}

fn http_date(headers: &HeaderMap, name: HeaderName) -> Option<SystemTime> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| httpdate::parse_http_date(v).ok())
}

/// Methods that change the resource and thereby invalidate stored copies.
pub fn invalidates(method: &Method) -> bool {
    !method.is_safe()
}

/// Can this request be answered from (and stored into) the cache?
const BYPASS_HEADERS: [HeaderName; 6] = [
    header::IF_MATCH,
    header::IF_NONE_MATCH,
    header::IF_MODIFIED_SINCE,
    header::IF_UNMODIFIED_SINCE,
    header::IF_RANGE,
    header::RANGE,
];

pub fn request_evaluate(
    method: &Method,
    headers: &HeaderMap,
    has_body: bool,
    is_remote: bool,
    has_query_string: bool,
) -> Option<RequestInfo> {
    if method != Method::GET || has_body {
        return None;
    }

    let mut info = RequestInfo {
        is_remote,
        has_query_string,
        only_if_cached: false,
    };

    for directive in directives(headers, header::CACHE_CONTROL) {
        match directive.as_str() {
            "no-cache" | "no-store" => return None,
            "only-if-cached" => info.only_if_cached = true,
            _ => {}
        }
    }

    if directives(headers, header::PRAGMA).any(|d| d == "no-cache") {
        return None;
    }

    // responses to authenticated requests are private
    if headers.contains_key(header::AUTHORIZATION) {
        return None;
    }

    // the origin answers these with 304 or 206 itself
    if BYPASS_HEADERS.iter().any(|name| headers.contains_key(name)) {
        return None;
    }

    Some(info)
}

fn cacheable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 200 | 203 | 300 | 301 | 410)
}

/// Decide whether a response may be stored, and compute its expiry.
pub fn response_evaluate(
    request: &RequestInfo,
    status: StatusCode,
    headers: &HeaderMap,
    now: SystemTime,
) -> Option<ResponseInfo> {
    if !cacheable_status(status) {
        return None;
    }

    let mut max_age = None;
    let mut s_maxage = None;
    for directive in directives(headers, header::CACHE_CONTROL) {
        match directive.as_str() {
            "private" | "no-cache" | "no-store" => return None,
            d => {
                if let Some(value) = d.strip_prefix("s-maxage=") {
                    s_maxage = value.parse::<u64>().ok();
                } else if let Some(value) = d.strip_prefix("max-age=") {
                    max_age = value.parse::<u64>().ok();
                }
            }
        }
    }

    let date = http_date(headers, header::DATE);
    if request.is_remote && date.is_none() {
        return None;
    }

    let mut expires = s_maxage
        .or(max_age)
        .map(|secs| now + Duration::from_secs(secs));

    if expires.is_none() && headers.contains_key(header::EXPIRES) {
        expires = Some(match http_date(headers, header::EXPIRES) {
            // correct for clock skew between us and the server
            Some(at) => match date {
                Some(date) => now + at.duration_since(date).unwrap_or(Duration::ZERO),
                None => at,
            },
            // an invalid Expires means "already expired"
            None => now,
        });
    }

    let last_modified = headers.get(header::LAST_MODIFIED).cloned();
    let etag = headers.get(header::ETAG).cloned();

    let expires = match expires {
        Some(expires) => expires,
        None if request.has_query_string => return None,
        None => {
            let modified = last_modified
                .as_ref()
                .and_then(|v| v.to_str().ok())
                .and_then(|v| httpdate::parse_http_date(v).ok());
            match modified {
                Some(modified) => {
                    let age = date
                        .unwrap_or(now)
                        .duration_since(modified)
                        .unwrap_or(Duration::ZERO);
                    now + (age / 10).min(MAX_HEURISTIC)
                }
                // stored, but revalidated on every use
                None if etag.is_some() => now,
                None => return None,
            }
        }
    };

    if expires <= now && last_modified.is_none() && etag.is_none() {
        return None;
    }

    let mut vary = Vec::new();
    for name in directives(headers, header::VARY) {
        if name == "*" {
            return None;
        }
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            vary.push(name);
        }
    }

    Some(ResponseInfo {
        expires,
        last_modified,
        etag,
        vary,
    })
}

/// Snapshot the request headers a stored response varies on.
pub fn vary_snapshot(vary: &[HeaderName], request: &HeaderMap) -> Vec<(HeaderName, Option<HeaderValue>)> {
    vary.iter()
        .map(|name| (name.clone(), request.get(name).cloned()))
        .collect()
}

/// Does `request` carry the same values as the snapshot?  Missing headers
/// compare as empty.
pub fn vary_fits(snapshot: &[(HeaderName, Option<HeaderValue>)], request: &HeaderMap) -> bool {
    fn value(v: Option<&HeaderValue>) -> &[u8] {
        v.map(HeaderValue::as_bytes).unwrap_or_default()
    }

    snapshot
        .iter()
        .all(|(name, stored)| value(stored.as_ref()) == value(request.get(name)))
}
