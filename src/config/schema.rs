//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Route definitions mapping requests to resources.
    pub routes: Vec<RouteConfig>,

    /// Backend clusters addressed by routes.
    pub clusters: Vec<ClusterConfig>,

    /// HTTP response cache.
    pub cache: CacheConfig,

    /// Connection pool settings.
    pub stock: StockConfig,

    /// Active health monitor scheduling.
    pub monitor: MonitorConfig,

    /// Failure tracker expiry times.
    pub failure: FailureConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Route configuration mapping requests to a cluster or a local directory.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Host header to match (exact match).
    pub host: Option<String>,

    /// Path prefix to match.
    pub path_prefix: Option<String>,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,

    /// Cluster to forward to.
    pub cluster: Option<String>,

    /// Directory to serve files from.
    pub local_root: Option<String>,

    /// Cache tag attached to documents stored for this route.
    pub cache_tag: Option<String>,

    /// Request header whose value selects a sticky node.
    pub sticky_header: Option<String>,
}

/// Active monitor kind for a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    #[default]
    None,
    Connect,
    Expect,
    Http,
}

/// A set of equivalent backend nodes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    pub name: String,

    /// Node addresses (e.g., "127.0.0.1:3000").
    pub nodes: Vec<String>,

    #[serde(default)]
    pub monitor: MonitorKind,

    /// String sent by the expect monitor after connecting.
    #[serde(default)]
    pub send: Option<String>,

    /// Response substring the expect monitor treats as healthy.
    #[serde(default)]
    pub expect: Option<String>,

    /// Response substring the expect monitor treats as "fade".
    #[serde(default)]
    pub fade_expect: Option<String>,

    /// Path probed by the HTTP monitor.
    #[serde(default = "default_monitor_path")]
    pub path: String,
}

fn default_monitor_path() -> String {
    "/health".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            nodes: Vec::new(),
            monitor: MonitorKind::None,
            send: None,
            expect: None,
            fade_expect: None,
            path: default_monitor_path(),
        }
    }
}

/// HTTP cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    /// Total body bytes the cache may hold.
    pub max_size: usize,

    /// Responses larger than this are not stored.
    pub cacheable_size_limit: usize,

    /// Give up storing a response body after this many seconds.
    pub store_timeout_secs: u64,

    /// Interval of the expired-document sweep.
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 64 * 1024 * 1024,
            cacheable_size_limit: 512 * 1024,
            store_timeout_secs: 60,
            cleanup_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StockConfig {
    /// Busy plus idle connections per backend address; 0 is unlimited.
    pub limit: usize,

    /// Idle connections kept per backend address.
    pub max_idle: usize,

    pub connect_timeout_secs: u64,

    /// How long a request waits for a connection when the limit is reached.
    pub wait_timeout_secs: u64,

    /// Wait for a free connection instead of failing at the limit.
    pub queue_when_full: bool,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            limit: 64,
            max_idle: 8,
            connect_timeout_secs: 5,
            wait_timeout_secs: 10,
            queue_when_full: true,
        }
    }
}

/// Active monitor scheduling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            timeout_secs: 5,
        }
    }
}

/// Failure tracker expiry times.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FailureConfig {
    /// Expiry of a failed-response mark.
    pub response_ttl_secs: u64,

    /// Expiry of a failed-connect mark.
    pub connect_ttl_secs: u64,

    /// Expiry of an administrative fade.
    pub fade_ttl_secs: u64,
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self {
            response_ttl_secs: 20,
            connect_ttl_secs: 20,
            fade_ttl_secs: 3 * 60 * 60,
        }
    }
}

impl FailureConfig {
    pub fn response_ttl(&self) -> Duration {
        Duration::from_secs(self.response_ttl_secs)
    }

    pub fn connect_ttl(&self) -> Duration {
        Duration::from_secs(self.connect_ttl_secs)
    }

    pub fn fade_ttl(&self) -> Duration {
        Duration::from_secs(self.fade_ttl_secs)
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Backend I/O timeout in seconds: connect, sending the request,
    /// waiting for the response head, and each wait for body data.
    pub backend_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            backend_secs: 20,
        }
    }
}

impl TimeoutConfig {
    pub fn backend(&self) -> Duration {
        Duration::from_secs(self.backend_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin control API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the control API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Control API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
