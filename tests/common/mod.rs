//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use app_gateway::config::{ClusterConfig, GatewayConfig, RouteConfig};
use app_gateway::lifecycle::{start, RunningGateway, Shutdown};

pub const API_KEY: &str = "test-key";

/// One canned backend response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Request as seen by a mock backend.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    /// Lowercased header lines.
    pub headers: Vec<(String, String)>,
}

impl MockRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Backend handle: address plus number of requests served.
#[derive(Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Start a simple mock backend that returns a fixed response.
pub async fn start_mock_backend(response: &'static str) -> MockBackend {
    start_programmable_backend(move |_| MockResponse::ok(response)).await
}

/// Start a keep-alive HTTP/1.1 backend answering with `f(request)`.
pub async fn start_programmable_backend<F>(f: F) -> MockBackend
where
    F: Fn(&MockRequest) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let f = Arc::new(f);

    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let f = f.clone();
            let counter = counter.clone();
            tokio::spawn(serve_connection(socket, f, counter));
        }
    });

    MockBackend { addr, hits }
}

async fn serve_connection<F>(mut socket: TcpStream, f: Arc<F>, hits: Arc<AtomicUsize>)
where
    F: Fn(&MockRequest) -> MockResponse + Send + Sync + 'static,
{
    let mut buffer = Vec::new();
    loop {
        let end = loop {
            if let Some(end) = find_head_end(&buffer) {
                break end;
            }
            let mut chunk = [0u8; 4096];
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            }
        };

        let head = String::from_utf8_lossy(&buffer[..end]).into_owned();
        buffer.drain(..end + 4);
        let request = parse_request(&head);

        let length: usize = request
            .header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        while buffer.len() < length {
            let mut chunk = [0u8; 4096];
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            }
        }
        buffer.drain(..length);

        hits.fetch_add(1, Ordering::SeqCst);
        let response = f(&request);

        let mut out = format!("HTTP/1.1 {} {}\r\n", response.status, reason(response.status));
        out.push_str(&format!("Date: {}\r\n", httpdate::fmt_http_date(SystemTime::now())));
        for (name, value) in &response.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str(&format!("Content-Length: {}\r\n\r\n", response.body.len()));
        if request.method != "HEAD" {
            out.push_str(&response.body);
        }
        if socket.write_all(out.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_request(head: &str) -> MockRequest {
    let mut lines = head.split("\r\n");
    let mut first = lines.next().unwrap_or_default().split(' ');
    let method = first.next().unwrap_or_default().to_string();
    let path = first.next().unwrap_or_default().to_string();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    MockRequest {
        method,
        path,
        headers,
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        304 => "Not Modified",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// An address nobody listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Gateway config with ephemeral listeners, the control API enabled and
/// one cluster routed at `/`.
pub fn gateway_config(nodes: &[SocketAddr]) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.admin.enabled = true;
    config.admin.bind_address = "127.0.0.1:0".to_string();
    config.admin.api_key = API_KEY.to_string();
    config.observability.metrics_enabled = false;
    config.stock.connect_timeout_secs = 1;

    config.clusters = vec![ClusterConfig {
        name: "app".to_string(),
        nodes: nodes.iter().map(|n| n.to_string()).collect(),
        ..Default::default()
    }];
    config.routes = vec![RouteConfig {
        name: "default".to_string(),
        cluster: Some("app".to_string()),
        cache_tag: Some("app".to_string()),
        ..Default::default()
    }];
    config
}

pub async fn start_gateway(config: &GatewayConfig) -> (RunningGateway, Arc<Shutdown>) {
    let shutdown = Arc::new(Shutdown::new());
    let running = start(config, &shutdown).await.unwrap();
    (running, shutdown)
}

pub async fn stop_gateway(running: RunningGateway, shutdown: Arc<Shutdown>) {
    shutdown.trigger();
    running.wait(Duration::from_secs(5)).await;
}
