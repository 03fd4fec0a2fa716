//! Loader dispatching on the address type, without caching.

use std::io;
use std::sync::Arc;

use super::{local, LoadError, LoadFuture, ResourceAddress, ResourceLoader, ResourceRequest};
use crate::http::client::HttpClient;

pub struct DirectResourceLoader {
    client: Arc<HttpClient>,
}

impl DirectResourceLoader {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self { client }
    }
}

impl ResourceLoader for DirectResourceLoader {
    fn send_request(&self, request: ResourceRequest) -> LoadFuture<'_> {
        Box::pin(async move {
            let ResourceRequest {
                method,
                address,
                headers,
                body,
                sticky,
                ..
            } = request;

            match address {
                ResourceAddress::Local { path } => {
                    let display = path.display().to_string();
                    tokio::task::spawn_blocking(move || local::load_file(&method, &path, &headers))
                        .await
                        .map_err(|e| LoadError::Io {
                            path: display,
                            source: io::Error::other(e),
                        })?
                }
                ResourceAddress::Http(http) => Ok(self
                    .client
                    .request(&method, &http, &headers, body, sticky.as_deref())
                    .await?),
            }
        })
    }
}
