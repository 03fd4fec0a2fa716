//! HTTP/1.1 client for backend clusters.
//!
//! # Data Flow
//! ```text
//! HttpClient::request
//!     → TcpBalancer::connect (pooled connection to a healthy node)
//!     → write request head, then the body via sink_socket
//!     → read response head (httparse, 1xx skipped)
//!     → response body as an Istream:
//!         Content-Length   SocketIstream (length mode)
//!         chunked          DechunkIstream over SocketIstream
//!         neither          SocketIstream until the server closes
//!     → connection returns to the pool once the body ended cleanly
//! ```
//!
//! # Design Decisions
//! - A connection is reused only when its body was read completely and
//!   nothing beyond it arrived
//! - A reused connection that fails before the first response byte
//!   (closed, reset, or the request could not be written) is retried for
//!   idempotent requests without a body
//! - Every wait on the backend is bounded by the client timeout: connect,
//!   request, response head, and each wait for body data
//! - Malformed or truncated responses mark the node with a Response
//!   failure; a good response clears it

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::os::fd::OwnedFd;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, Sleep};

use crate::health::{FailureManager, FailureStatus};
use crate::istream::{
    sink_buffer, sink_socket, BoxIstream, DechunkIstream, FdType, Istream, IstreamError,
    IstreamHandler, MemoryIstream, SinkError,
};
use crate::load_balancer::{BalancedConnection, BalancerError, TcpBalancer};
use crate::resource::{HttpAddress, HttpResponse};

/// Largest response head accepted.
const MAX_HEAD: usize = 64 * 1024;

const MAX_HEADERS: usize = 100;

/// Request bodies of unknown length are buffered up to this size so they
/// can be sent with a Content-Length.
const MAX_BUFFERED_BODY: usize = 8 * 1024 * 1024;

const READ_SIZE: usize = 16 * 1024;

/// Retries after a reused connection failed before answering.
const MAX_RETRIES: usize = 2;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Connect(#[from] BalancerError),

    #[error("failed to send request to {addr}: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to send request body: {0}")]
    Body(#[from] SinkError),

    #[error("failed to read response from {addr}: {source}")]
    Receive {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("server closed the connection prematurely")]
    PrematureClose,

    #[error("timed out connecting to a node")]
    ConnectTimeout,

    #[error("timed out waiting for {addr}")]
    Timeout { addr: SocketAddr },

    #[error("malformed response: {0}")]
    Protocol(String),
}

impl ClientError {
    pub fn is_timeout(&self) -> bool {
        match self {
            ClientError::Connect(e) => e.is_timeout(),
            ClientError::Send { source, .. } | ClientError::Receive { source, .. } => {
                source.kind() == io::ErrorKind::TimedOut
            }
            ClientError::ConnectTimeout | ClientError::Timeout { .. } => true,
            _ => false,
        }
    }

    /// The exchange failed before any response byte arrived, in a way a
    /// pooled connection closed by the server while idle would fail.
    fn is_stale_connection(&self, reused: bool) -> bool {
        match self {
            ClientError::PrematureClose => true,
            ClientError::Send { .. } => reused,
            _ => false,
        }
    }

    /// Counts against the node as a bad response.
    fn is_response_failure(&self) -> bool {
        matches!(
            self,
            ClientError::PrematureClose
                | ClientError::Protocol(_)
                | ClientError::Send { .. }
                | ClientError::Receive { .. }
                | ClientError::Timeout { .. }
        )
    }
}

/// Remove hop-by-hop headers, including those named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    for name in HOP_BY_HOP.iter().copied().chain(named.iter().map(String::as_str)) {
        headers.remove(name);
    }
}

fn header_has_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn serialize_head(
    method: &Method,
    address: &HttpAddress,
    addr: SocketAddr,
    headers: &HeaderMap,
    body_length: Option<u64>,
) -> Vec<u8> {
    let mut forwarded = headers.clone();
    strip_hop_by_hop(&mut forwarded);
    forwarded.remove(header::CONTENT_LENGTH);
    forwarded.remove(header::EXPECT);

    let mut head = Vec::with_capacity(512);
    head.extend_from_slice(format!("{} {} HTTP/1.1\r\n", method, address.path).as_bytes());
    if !forwarded.contains_key(header::HOST) {
        head.extend_from_slice(format!("host: {addr}\r\n").as_bytes());
    }
    for (name, value) in &forwarded {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    if let Some(length) = body_length {
        head.extend_from_slice(format!("content-length: {length}\r\n").as_bytes());
    }
    head.extend_from_slice(b"connection: keep-alive\r\n\r\n");
    head
}

#[derive(Debug)]
struct ResponseHead {
    status: StatusCode,
    /// Minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: HeaderMap,
}

impl ResponseHead {
    fn keep_alive(&self) -> bool {
        if self.version == 0 {
            header_has_token(&self.headers, header::CONNECTION, "keep-alive")
        } else {
            !header_has_token(&self.headers, header::CONNECTION, "close")
        }
    }
}

/// Parse a complete head from the front of `buffer` and consume it.
fn parse_head(buffer: &mut BytesMut) -> Result<Option<ResponseHead>, ClientError> {
    let (length, head) = {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut slots);
        let length = match response.parse(buffer) {
            Ok(httparse::Status::Complete(length)) => length,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => return Err(ClientError::Protocol(e.to_string())),
        };

        let status = response
            .code
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(|| ClientError::Protocol("invalid status code".to_string()))?;

        let mut headers = HeaderMap::with_capacity(response.headers.len());
        for h in response.headers.iter() {
            let name = HeaderName::from_bytes(h.name.as_bytes())
                .map_err(|e| ClientError::Protocol(e.to_string()))?;
            let value = HeaderValue::from_bytes(h.value)
                .map_err(|e| ClientError::Protocol(e.to_string()))?;
            headers.append(name, value);
        }

        (
            length,
            ResponseHead {
                status,
                version: response.version.unwrap_or(1),
                headers,
            },
        )
    };

    buffer.advance(length);
    Ok(Some(head))
}

async fn read_head(
    stream: &mut TcpStream,
    addr: SocketAddr,
    buffer: &mut BytesMut,
) -> Result<ResponseHead, ClientError> {
    let mut received = false;
    loop {
        if !buffer.is_empty() {
            if let Some(head) = parse_head(buffer)? {
                if head.status.is_informational() {
                    continue;
                }
                return Ok(head);
            }
            if buffer.len() >= MAX_HEAD {
                return Err(ClientError::Protocol("response head too large".to_string()));
            }
        }

        buffer.reserve(READ_SIZE);
        let n = match stream.read_buf(buffer).await {
            Ok(n) => n,
            Err(e) if !received && e.kind() == io::ErrorKind::ConnectionReset => {
                return Err(ClientError::PrematureClose);
            }
            Err(source) => return Err(ClientError::Receive { addr, source }),
        };
        if n == 0 {
            return Err(if received {
                ClientError::Protocol("truncated response head".to_string())
            } else {
                ClientError::PrematureClose
            });
        }
        received = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Empty,
    Length(u64),
    Chunked,
    UntilClose,
}

fn framing(method: &Method, head: &ResponseHead) -> Result<Framing, ClientError> {
    if method == Method::HEAD
        || head.status == StatusCode::NO_CONTENT
        || head.status == StatusCode::NOT_MODIFIED
    {
        return Ok(Framing::Empty);
    }

    if head.headers.contains_key(header::TRANSFER_ENCODING) {
        return if header_has_token(&head.headers, header::TRANSFER_ENCODING, "chunked") {
            Ok(Framing::Chunked)
        } else {
            Ok(Framing::UntilClose)
        };
    }

    match head.headers.get(header::CONTENT_LENGTH) {
        Some(value) => {
            let length = value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or_else(|| ClientError::Protocol("invalid Content-Length".to_string()))?;
            Ok(if length == 0 {
                Framing::Empty
            } else {
                Framing::Length(length)
            })
        }
        None => Ok(Framing::UntilClose),
    }
}

/// Balanced, pooled HTTP/1.1 client.
pub struct HttpClient {
    balancer: Arc<TcpBalancer>,
    response_ttl: Duration,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(balancer: Arc<TcpBalancer>, response_ttl: Duration, timeout: Duration) -> Self {
        Self {
            balancer,
            response_ttl,
            timeout,
        }
    }

    pub fn balancer(&self) -> &Arc<TcpBalancer> {
        &self.balancer
    }

    fn failures(&self) -> &Arc<FailureManager> {
        self.balancer.balancer().failures()
    }

    /// Send a request to a node of `address` and return the response head
    /// with a streaming body.
    pub async fn request(
        &self,
        method: &Method,
        address: &HttpAddress,
        headers: &HeaderMap,
        body: Option<BoxIstream>,
        sticky: Option<&str>,
    ) -> Result<HttpResponse, ClientError> {
        let mut body = match body {
            Some(body) if body.available(false).is_none() => {
                let data = sink_buffer(body, MAX_BUFFERED_BODY).await?;
                Some(Box::new(MemoryIstream::new(data)) as BoxIstream)
            }
            body => body,
        };
        let body_length = body.as_ref().and_then(|b| b.available(false));
        let retryable = body.is_none() && (method == Method::GET || method == Method::HEAD);

        let mut attempt = 0;
        loop {
            let mut conn = tokio::time::timeout(
                self.timeout,
                self.balancer.connect(&address.addresses, sticky),
            )
            .await
            .map_err(|_| ClientError::ConnectTimeout)??;
            let addr = conn.addr;
            let reused = conn.stream.is_reused();
            let head = serialize_head(method, address, addr, headers, body_length);

            let result = tokio::time::timeout(
                self.timeout,
                self.exchange(&mut conn, &head, body.take()),
            )
            .await
            .unwrap_or(Err(ClientError::Timeout { addr }));

            match result {
                Ok((head, buffer)) => {
                    self.failures().unset(addr, FailureStatus::Response);
                    return self.into_response(method, conn, head, buffer);
                }
                Err(e) if retryable && attempt < MAX_RETRIES && e.is_stale_connection(reused) => {
                    tracing::debug!(addr = %addr, attempt, error = %e, "Connection failed before response, retrying");
                    conn.put(false);
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_response_failure() {
                        tracing::warn!(addr = %addr, error = %e, "Bad response from node");
                        self.failures()
                            .set(addr, FailureStatus::Response, Some(self.response_ttl));
                    }
                    conn.put(false);
                    return Err(e);
                }
            }
        }
    }

    async fn exchange(
        &self,
        conn: &mut BalancedConnection,
        head: &[u8],
        body: Option<BoxIstream>,
    ) -> Result<(ResponseHead, BytesMut), ClientError> {
        let addr = conn.addr;
        let stream: &mut TcpStream = &mut conn.stream;
        stream
            .write_all(head)
            .await
            .map_err(|source| ClientError::Send { addr, source })?;
        if let Some(body) = body {
            sink_socket(body, stream).await?;
        }

        let mut buffer = BytesMut::with_capacity(READ_SIZE);
        let head = read_head(stream, addr, &mut buffer).await?;
        Ok((head, buffer))
    }

    fn into_response(
        &self,
        method: &Method,
        conn: BalancedConnection,
        head: ResponseHead,
        buffer: BytesMut,
    ) -> Result<HttpResponse, ClientError> {
        let framing = framing(method, &head)?;
        let keep_alive = head.keep_alive();
        let ResponseHead {
            status,
            mut headers,
            ..
        } = head;
        strip_hop_by_hop(&mut headers);

        let body: Option<BoxIstream> = match framing {
            Framing::Empty => {
                conn.put(keep_alive && buffer.is_empty());
                None
            }
            Framing::Length(length) => Some(Box::new(SocketIstream::new(
                conn,
                buffer,
                BodyMode::Length(length),
                keep_alive,
                self.failures().clone(),
                self.response_ttl,
                self.timeout,
            ))),
            Framing::Chunked => {
                let complete = Arc::new(AtomicBool::new(false));
                let socket = SocketIstream::new(
                    conn,
                    buffer,
                    BodyMode::Chunked(complete.clone()),
                    keep_alive,
                    self.failures().clone(),
                    self.response_ttl,
                    self.timeout,
                );
                Some(Box::new(DechunkIstream::new(
                    Box::new(socket),
                    Box::new(move || complete.store(true, Ordering::Release)),
                )))
            }
            Framing::UntilClose => {
                headers.remove(header::CONTENT_LENGTH);
                Some(Box::new(SocketIstream::new(
                    conn,
                    buffer,
                    BodyMode::UntilClose,
                    false,
                    self.failures().clone(),
                    self.response_ttl,
                    self.timeout,
                )))
            }
        };

        Ok(HttpResponse::new(status, headers, body))
    }
}

enum BodyMode {
    Length(u64),
    /// Raw chunked data; the flag is set by the dechunker once the
    /// terminating chunk was parsed.
    Chunked(Arc<AtomicBool>),
    UntilClose,
}

/// Response body read straight from a pooled connection.
struct SocketIstream {
    conn: Option<BalancedConnection>,
    buffer: BytesMut,
    mode: BodyMode,
    keep_alive: bool,
    failures: Arc<FailureManager>,
    response_ttl: Duration,
    timeout: Duration,
    /// Armed when a read finds the socket empty; reset by incoming data.
    deadline: Pin<Box<Sleep>>,
    waiting: bool,
}

impl SocketIstream {
    fn new(
        conn: BalancedConnection,
        buffer: BytesMut,
        mode: BodyMode,
        keep_alive: bool,
        failures: Arc<FailureManager>,
        response_ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            conn: Some(conn),
            buffer,
            mode,
            keep_alive,
            failures,
            response_ttl,
            timeout,
            deadline: Box::pin(tokio::time::sleep(timeout)),
            waiting: false,
        }
    }

    fn is_complete(&self) -> bool {
        match &self.mode {
            BodyMode::Length(remaining) => *remaining == 0,
            BodyMode::Chunked(complete) => complete.load(Ordering::Acquire),
            BodyMode::UntilClose => false,
        }
    }

    fn release(&mut self) {
        if let Some(conn) = self.conn.take() {
            let reuse = self.keep_alive && self.buffer.is_empty() && self.is_complete();
            conn.put(reuse);
        }
    }

    fn fail(&mut self, handler: &mut dyn IstreamHandler, error: IstreamError) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!(addr = %conn.addr, error = %error, "Response body failed");
            self.failures
                .set(conn.addr, FailureStatus::Response, Some(self.response_ttl));
            conn.put(false);
        }
        handler.on_error(error);
    }

    /// Offer buffered data; true if all of it was accepted and the body
    /// goes on.
    fn submit(&mut self, handler: &mut dyn IstreamHandler) -> bool {
        let mut length = self.buffer.len();
        if let BodyMode::Length(remaining) = self.mode {
            length = length.min(usize::try_from(remaining).unwrap_or(usize::MAX));
        }

        let consumed = handler.on_data(&self.buffer[..length]);
        self.buffer.advance(consumed);

        match &mut self.mode {
            BodyMode::Length(remaining) => {
                *remaining -= consumed as u64;
                if *remaining == 0 {
                    self.release();
                    handler.on_eof();
                    return false;
                }
            }
            BodyMode::Chunked(complete) => {
                if complete.load(Ordering::Acquire) {
                    return false;
                }
            }
            BodyMode::UntilClose => {}
        }

        consumed == length && self.buffer.is_empty()
    }
}

impl Istream for SocketIstream {
    fn available(&self, partial: bool) -> Option<u64> {
        match self.mode {
            BodyMode::Length(remaining) => Some(remaining),
            _ if partial => Some(self.buffer.len() as u64),
            _ => None,
        }
    }

    fn read(&mut self, cx: &mut Context<'_>, handler: &mut dyn IstreamHandler) {
        if !self.buffer.is_empty() && !self.submit(handler) {
            return;
        }

        loop {
            let Some(conn) = self.conn.as_ref() else {
                return;
            };
            let socket = conn.socket();

            self.buffer.reserve(READ_SIZE);
            match socket.try_read_buf(&mut self.buffer) {
                Ok(0) => {
                    if matches!(self.mode, BodyMode::UntilClose) {
                        self.conn.take();
                        handler.on_eof();
                    } else {
                        self.fail(
                            handler,
                            IstreamError::PrematureEof(
                                "server closed the connection during the body".to_string(),
                            ),
                        );
                    }
                    return;
                }
                Ok(_) => {
                    self.waiting = false;
                    self.submit(handler);
                    return;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    match socket.poll_read_ready(cx) {
                        Poll::Ready(Ok(())) => continue,
                        Poll::Ready(Err(e)) => {
                            self.fail(handler, IstreamError::io("failed to read response", e));
                            return;
                        }
                        Poll::Pending => {
                            if !self.waiting {
                                self.waiting = true;
                                let deadline = Instant::now() + self.timeout;
                                self.deadline.as_mut().reset(deadline);
                            }
                            if self.deadline.as_mut().poll(cx).is_ready() {
                                self.fail(
                                    handler,
                                    IstreamError::Timeout(
                                        "no response data from the server".to_string(),
                                    ),
                                );
                            }
                            return;
                        }
                    }
                }
                Err(e) => {
                    self.fail(handler, IstreamError::io("failed to read response", e));
                    return;
                }
            }
        }
    }

    fn into_fd(self: Box<Self>) -> Result<(FdType, OwnedFd), BoxIstream> {
        Err(self)
    }
}

impl Drop for SocketIstream {
    fn drop(&mut self) {
        self.release();
    }
}
