//! Probe that sends a string and inspects the answer.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::monitor::{MonitorClass, MonitorError, MonitorStatus};

/// Grace period before reading, for answers split across packets.
const READ_DELAY: Duration = Duration::from_millis(10);

pub struct ExpectMonitor {
    send: Option<String>,
    expect: Option<String>,
    fade_expect: Option<String>,
}

impl ExpectMonitor {
    pub fn new(send: Option<String>, expect: Option<String>, fade_expect: Option<String>) -> Self {
        Self {
            send,
            expect,
            fade_expect,
        }
    }

    fn evaluate(&self, received: &[u8]) -> Result<MonitorStatus, MonitorError> {
        let contains = |needle: &str| {
            let needle = needle.as_bytes();
            !needle.is_empty() && received.windows(needle.len()).any(|w| w == needle)
        };

        if self.fade_expect.as_deref().is_some_and(contains) {
            return Ok(MonitorStatus::Fade);
        }
        match self.expect.as_deref() {
            None | Some("") => Ok(MonitorStatus::Success),
            Some(expect) if contains(expect) => Ok(MonitorStatus::Success),
            Some(_) => Err(MonitorError::ExpectationFailed),
        }
    }
}

impl MonitorClass for ExpectMonitor {
    fn name(&self) -> &'static str {
        "expect"
    }

    fn check(&self, addr: SocketAddr) -> BoxFuture<'_, Result<MonitorStatus, MonitorError>> {
        Box::pin(async move {
            let mut stream = TcpStream::connect(addr)
                .await
                .map_err(MonitorError::Connect)?;

            if let Some(send) = self.send.as_deref().filter(|s| !s.is_empty()) {
                stream.write_all(send.as_bytes()).await?;
            }

            stream.readable().await?;
            tokio::time::sleep(READ_DELAY).await;

            let mut buffer = [0u8; 1024];
            let n = stream.read(&mut buffer).await?;
            self.evaluate(&buffer[..n])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn answering_server(answer: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 64];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(answer.as_bytes()).await;
            }
        });
        addr
    }

    fn monitor(expect: &str, fade: &str) -> ExpectMonitor {
        ExpectMonitor::new(
            Some("PING\r\n".to_string()),
            Some(expect.to_string()),
            Some(fade.to_string()),
        )
    }

    #[tokio::test]
    async fn test_expect_success() {
        let addr = answering_server("+PONG\r\n").await;
        let status = monitor("PONG", "DRAIN").check(addr).await.unwrap();
        assert_eq!(status, MonitorStatus::Success);
    }

    #[tokio::test]
    async fn test_expect_fade_wins() {
        let addr = answering_server("PONG DRAIN\r\n").await;
        let status = monitor("PONG", "DRAIN").check(addr).await.unwrap();
        assert_eq!(status, MonitorStatus::Fade);
    }

    #[tokio::test]
    async fn test_expect_mismatch() {
        let addr = answering_server("-ERR\r\n").await;
        assert!(matches!(
            monitor("PONG", "DRAIN").check(addr).await,
            Err(MonitorError::ExpectationFailed)
        ));
    }

    #[test]
    fn test_empty_expect_accepts_anything() {
        let m = ExpectMonitor::new(None, None, None);
        assert_eq!(m.evaluate(b"whatever").unwrap(), MonitorStatus::Success);
    }
}
