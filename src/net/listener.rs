//! TCP listener setup.

use std::net::SocketAddr;

use tokio::net::TcpListener;

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("invalid listen address '{0}'")]
    Address(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

pub fn parse_address(address: &str) -> Result<SocketAddr, ListenerError> {
    address
        .parse()
        .map_err(|_| ListenerError::Address(address.to_string()))
}

/// Bind a listener on `address` (e.g. "0.0.0.0:8080").
pub async fn bind(address: &str) -> Result<TcpListener, ListenerError> {
    let addr = parse_address(address)?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ListenerError::Bind {
            address: addr,
            source,
        })?;

    if let Ok(local) = listener.local_addr() {
        tracing::info!(address = %local, "Listener bound");
    }
    Ok(listener)
}
