//! Administrative control of a running gateway.
//!
//! # Data Flow
//! ```text
//! gateway-ctl / HTTP client
//!     → api.rs (admin router, bearer auth, path parsing)
//!     → ControlCommand
//!     → ControlHandler::execute
//!         FlushHttpCache → HttpCache::flush_tag / flush_all
//!         EnableNode     → FailureManager::unset(Ok)
//!         FadeNode       → FailureManager::set(Fade, fade_ttl)
//!         NodeStatus     → FailureManager::get_status
//!         Stats          → cache + stock + failure summary
//!     → ControlReply (JSON)
//! ```
//!
//! # Design Decisions
//! - Commands are plain values so they can be executed without HTTP
//! - Node status is reported coarsely: ok, fade or error

pub mod api;
pub mod auth;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheStats, HttpCache};
use crate::health::{FailureManager, FailureStatus};
use crate::stock::{StockMap, StockStats, TcpStockClass};

pub use api::control_router;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Drop cached documents, all of them or those carrying a tag.
    FlushHttpCache(Option<String>),
    EnableNode(SocketAddr),
    FadeNode(SocketAddr),
    NodeStatus(SocketAddr),
    Stats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Ok,
    Fade,
    Error,
}

impl From<FailureStatus> for NodeState {
    fn from(status: FailureStatus) -> Self {
        match status {
            FailureStatus::Ok => NodeState::Ok,
            FailureStatus::Fade => NodeState::Fade,
            _ => NodeState::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedNode {
    pub addr: SocketAddr,
    pub status: FailureStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    /// `None` when the cache is disabled.
    pub cache: Option<CacheStats>,
    pub stock: StockStats,
    pub stocks: usize,
    pub failed_nodes: Vec<FailedNode>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ControlReply {
    Flushed { documents: usize },
    Done,
    NodeStatus { addr: SocketAddr, status: NodeState },
    Stats(Stats),
}

pub struct ControlHandler {
    cache: Option<Arc<HttpCache>>,
    failures: Arc<FailureManager>,
    stock: Arc<StockMap<TcpStockClass>>,
    fade_ttl: Duration,
}

impl ControlHandler {
    pub fn new(
        cache: Option<Arc<HttpCache>>,
        failures: Arc<FailureManager>,
        stock: Arc<StockMap<TcpStockClass>>,
        fade_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            failures,
            stock,
            fade_ttl,
        }
    }

    pub fn execute(&self, command: ControlCommand) -> ControlReply {
        tracing::info!(command = ?command, "Control command");

        match command {
            ControlCommand::FlushHttpCache(tag) => {
                let documents = match (&self.cache, tag) {
                    (None, _) => 0,
                    (Some(cache), Some(tag)) => cache.flush_tag(&tag),
                    (Some(cache), None) => cache.flush_all(),
                };
                ControlReply::Flushed { documents }
            }
            ControlCommand::EnableNode(addr) => {
                self.failures.unset(addr, FailureStatus::Ok);
                ControlReply::Done
            }
            ControlCommand::FadeNode(addr) => {
                self.failures
                    .set(addr, FailureStatus::Fade, Some(self.fade_ttl));
                ControlReply::Done
            }
            ControlCommand::NodeStatus(addr) => ControlReply::NodeStatus {
                addr,
                status: self.failures.get_status(addr).into(),
            },
            ControlCommand::Stats => ControlReply::Stats(self.stats()),
        }
    }

    fn stats(&self) -> Stats {
        let mut failed_nodes: Vec<_> = self
            .failures
            .failed_nodes()
            .into_iter()
            .map(|(addr, status)| FailedNode { addr, status })
            .collect();
        failed_nodes.sort_by_key(|node| node.addr);

        Stats {
            cache: self.cache.as_ref().map(|cache| cache.stats()),
            stock: self.stock.stats(),
            stocks: self.stock.len(),
            failed_nodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::stock::StockOptions;

    pub(crate) fn handler(cache: Option<Arc<HttpCache>>) -> (ControlHandler, Arc<FailureManager>) {
        let failures = Arc::new(FailureManager::new());
        let stock = Arc::new(StockMap::new(
            Arc::new(TcpStockClass::new(Duration::from_secs(1))),
            StockOptions::default(),
        ));
        let handler = ControlHandler::new(
            cache,
            failures.clone(),
            stock,
            Duration::from_secs(3 * 60 * 60),
        );
        (handler, failures)
    }

    #[tokio::test]
    async fn test_fade_and_enable() {
        let (handler, failures) = handler(None);
        let addr: SocketAddr = "10.0.0.1:80".parse().unwrap();

        handler.execute(ControlCommand::FadeNode(addr));
        assert_eq!(failures.get_status(addr), FailureStatus::Fade);
        assert!(matches!(
            handler.execute(ControlCommand::NodeStatus(addr)),
            ControlReply::NodeStatus { status: NodeState::Fade, .. }
        ));

        failures.set(addr, FailureStatus::Connect, None);
        assert!(matches!(
            handler.execute(ControlCommand::NodeStatus(addr)),
            ControlReply::NodeStatus { status: NodeState::Error, .. }
        ));

        handler.execute(ControlCommand::EnableNode(addr));
        assert_eq!(failures.get_status(addr), FailureStatus::Ok);
    }

    #[tokio::test]
    async fn test_stats() {
        let cache = Arc::new(HttpCache::new(&CacheConfig::default()));
        let (handler, failures) = handler(Some(cache));
        failures.set("10.0.0.2:80".parse().unwrap(), FailureStatus::Monitor, None);

        match handler.execute(ControlCommand::Stats) {
            ControlReply::Stats(stats) => {
                assert_eq!(stats.cache.map(|c| c.documents), Some(0));
                assert_eq!(stats.stocks, 0);
                assert_eq!(stats.failed_nodes.len(), 1);
                assert_eq!(stats.failed_nodes[0].status, FailureStatus::Monitor);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_flush_without_cache() {
        let (handler, _) = handler(None);
        assert!(matches!(
            handler.execute(ControlCommand::FlushHttpCache(Some("x".to_string()))),
            ControlReply::Flushed { documents: 0 }
        ));
    }
}
