//! Probe that only checks whether a TCP connection can be established.

use std::net::SocketAddr;

use futures_util::future::BoxFuture;
use tokio::net::TcpStream;

use super::monitor::{MonitorClass, MonitorError, MonitorStatus};

pub struct ConnectMonitor;

impl MonitorClass for ConnectMonitor {
    fn name(&self) -> &'static str {
        "connect"
    }

    fn check(&self, addr: SocketAddr) -> BoxFuture<'_, Result<MonitorStatus, MonitorError>> {
        Box::pin(async move {
            TcpStream::connect(addr)
                .await
                .map_err(MonitorError::Connect)?;
            Ok(MonitorStatus::Success)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_monitor() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert_eq!(
            ConnectMonitor.check(addr).await.unwrap(),
            MonitorStatus::Success
        );

        drop(listener);
        assert!(matches!(
            ConnectMonitor.check(addr).await,
            Err(MonitorError::Connect(_))
        ));
    }
}
