//! Pooled outgoing TCP connections.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::net::TcpStream;

use super::StockClass;

pub struct TcpStockClass {
    connect_timeout: Duration,
}

impl TcpStockClass {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl StockClass for TcpStockClass {
    type Request = SocketAddr;
    type Item = TcpStream;

    fn create<'a>(
        &'a self,
        _key: &'a str,
        addr: &'a SocketAddr,
    ) -> BoxFuture<'a, io::Result<TcpStream>> {
        Box::pin(async move {
            let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
            stream.set_nodelay(true)?;
            tracing::debug!(addr = %addr, "Connected");
            Ok(stream)
        })
    }

    /// An idle connection must have nothing to read: readable means the
    /// peer closed it or sent something unsolicited.
    fn borrow(&self, stream: &mut TcpStream) -> bool {
        let mut probe = [0u8; 1];
        match stream.try_read(&mut probe) {
            Err(e) => e.kind() == io::ErrorKind::WouldBlock,
            Ok(_) => false,
        }
    }
}
