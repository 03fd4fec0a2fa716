//! Balanced connect: pick a node, lease a pooled connection, fail over.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use super::{AddressList, Balancer};
use crate::health::FailureStatus;
use crate::stock::{StockError, StockItem, StockMap, TcpStockClass};

#[derive(Debug, thiserror::Error)]
pub enum BalancerError {
    #[error("no addresses to connect to")]
    Empty,

    #[error(transparent)]
    Stock(#[from] StockError),
}

impl BalancerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BalancerError::Stock(e) if e.is_timeout())
    }
}

/// A leased connection and the node it goes to.
pub struct BalancedConnection {
    pub addr: SocketAddr,
    pub stream: StockItem<TcpStockClass>,
}

impl BalancedConnection {
    pub fn socket(&self) -> &TcpStream {
        &self.stream
    }

    /// Return the connection to the pool (or destroy it).
    pub fn put(self, reuse: bool) {
        self.stream.put(reuse);
    }
}

/// Retries allowed after a failed connect, by cluster size.
pub fn max_retries(len: usize) -> usize {
    match len {
        0 | 1 => 0,
        2 => 1,
        _ => 2,
    }
}

pub struct TcpBalancer {
    balancer: Balancer,
    stock: Arc<StockMap<TcpStockClass>>,
    connect_ttl: Duration,
}

impl TcpBalancer {
    pub fn new(
        balancer: Balancer,
        stock: Arc<StockMap<TcpStockClass>>,
        connect_ttl: Duration,
    ) -> Self {
        Self {
            balancer,
            stock,
            connect_ttl,
        }
    }

    pub fn balancer(&self) -> &Balancer {
        &self.balancer
    }

    pub fn stock(&self) -> &Arc<StockMap<TcpStockClass>> {
        &self.stock
    }

    /// Connect to a node of `list`.  A node whose connect fails is marked
    /// failed and the next pick is tried.
    pub async fn connect(
        &self,
        list: &AddressList,
        sticky: Option<&str>,
    ) -> Result<BalancedConnection, BalancerError> {
        let retries = max_retries(list.len());
        let mut attempt = 0;

        loop {
            let addr = self.balancer.pick(list, sticky).ok_or(BalancerError::Empty)?;

            match self.stock.get(&addr.to_string(), &addr).await {
                Ok(stream) => return Ok(BalancedConnection { addr, stream }),
                Err(e @ StockError::Create { .. }) => {
                    tracing::warn!(addr = %addr, attempt, error = %e, "Connect failed");
                    self.balancer.failures().set(
                        addr,
                        FailureStatus::Connect,
                        Some(self.connect_ttl),
                    );
                    if attempt >= retries {
                        return Err(e.into());
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::FailureManager;
    use crate::stock::StockOptions;
    use tokio::net::TcpListener;

    async fn dead_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    fn balancer(failures: Arc<FailureManager>) -> TcpBalancer {
        TcpBalancer::new(
            Balancer::new(failures),
            Arc::new(StockMap::new(
                Arc::new(TcpStockClass::new(Duration::from_secs(1))),
                StockOptions::default(),
            )),
            Duration::from_secs(20),
        )
    }

    #[tokio::test]
    async fn test_fails_over_to_live_node() {
        let live = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live_addr = live.local_addr().unwrap();
        let dead = dead_addr().await;

        let failures = Arc::new(FailureManager::new());
        let tcp = balancer(failures.clone());
        let list = AddressList::new(vec![dead, live_addr]);

        let conn = tcp.connect(&list, None).await.unwrap();
        assert_eq!(conn.addr, live_addr);
        assert_eq!(failures.get_status(dead), FailureStatus::Connect);

        // the dead node is skipped from now on
        conn.put(true);
        let conn = tcp.connect(&list, None).await.unwrap();
        assert_eq!(conn.addr, live_addr);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let list = AddressList::new(vec![dead_addr().await, dead_addr().await]);
        let failures = Arc::new(FailureManager::new());
        let tcp = balancer(failures.clone());

        let err = tcp.connect(&list, None).await.err().unwrap();
        assert!(matches!(err, BalancerError::Stock(StockError::Create { .. })));
        for addr in list.addresses() {
            assert_eq!(failures.get_status(*addr), FailureStatus::Connect);
        }
    }

    #[test]
    fn test_max_retries() {
        assert_eq!(max_retries(1), 0);
        assert_eq!(max_retries(2), 1);
        assert_eq!(max_retries(5), 2);
    }
}
