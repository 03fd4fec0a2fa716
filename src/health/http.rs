//! HTTP probe: GET a path and judge the status code.

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::future::BoxFuture;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use super::monitor::{MonitorClass, MonitorError, MonitorStatus};

pub struct HttpMonitor {
    path: String,
    client: Client<HttpConnector, Body>,
}

impl HttpMonitor {
    pub fn new(path: String) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { path, client }
    }
}

impl MonitorClass for HttpMonitor {
    fn name(&self) -> &'static str {
        "http"
    }

    fn check(&self, addr: SocketAddr) -> BoxFuture<'_, Result<MonitorStatus, MonitorError>> {
        Box::pin(async move {
            let request = Request::builder()
                .method("GET")
                .uri(format!("http://{}{}", addr, self.path))
                .header("user-agent", "app-gateway-monitor")
                .body(Body::empty())
                .map_err(|e| MonitorError::Http(e.to_string()))?;

            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| MonitorError::Http(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                Ok(MonitorStatus::Success)
            } else if status == StatusCode::SERVICE_UNAVAILABLE {
                Ok(MonitorStatus::Fade)
            } else {
                Err(MonitorError::Http(format!("status {status}")))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn status_server(status_line: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!("HTTP/1.1 {status_line}\r\nContent-Length: 0\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_http_monitor_statuses() {
        let monitor = HttpMonitor::new("/health".to_string());

        let ok = status_server("200 OK").await;
        assert_eq!(monitor.check(ok).await.unwrap(), MonitorStatus::Success);

        let draining = status_server("503 Service Unavailable").await;
        assert_eq!(monitor.check(draining).await.unwrap(), MonitorStatus::Fade);

        let broken = status_server("500 Internal Server Error").await;
        assert!(matches!(
            monitor.check(broken).await,
            Err(MonitorError::Http(_))
        ));
    }
}
