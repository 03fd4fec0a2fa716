//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all gateway handler
//! - Wire up middleware (tracing, timeout, concurrency limit, request ID)
//! - Bind server to a plain or TLS listener
//! - Dispatch requests to routing, then to the resource loader
//! - Stream loader responses back; map errors to status codes

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use super::request::{
    propagate_request_id_layer, resource_request, set_request_id_layer, RequestIdExt,
};
use super::response::{error_response, into_response};
use crate::config::GatewayConfig;
use crate::observability::metrics;
use crate::resource::ResourceLoader;
use crate::routing::{RouteError, Router as GatewayRouter};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<GatewayRouter>,
    pub loader: Arc<dyn ResourceLoader>,
}

/// Front server of the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(
        config: &GatewayConfig,
        routes: Arc<GatewayRouter>,
        loader: Arc<dyn ResourceLoader>,
    ) -> Self {
        let state = AppState { routes, loader };
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let router = Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.timeouts.request_secs,
            )));

        let router = if config.listener.max_connections > 0 {
            router.layer(ConcurrencyLimitLayer::new(config.listener.max_connections))
        } else {
            router
        };

        router
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve plain HTTP on `listener` until shutdown.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS on `addr` until shutdown.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> io::Result<()> {
        tracing::info!(address = %addr, "HTTPS server starting");

        let handle = axum_server::Handle::new();
        let stopper = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            stopper.graceful_shutdown(Some(Duration::from_secs(30)));
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(
                self.router
                    .into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

/// Main gateway handler.
/// Looks up the route and hands the request to the loader chain.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let request_id = request.request_id().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let route = match state.routes.route(&request) {
        Ok(route) => route,
        Err(e) => {
            let status = match e {
                RouteError::NoMatch => StatusCode::NOT_FOUND,
                RouteError::BadPath => StatusCode::BAD_REQUEST,
            };
            tracing::warn!(request_id = %request_id, path = %path, error = %e, "Request not routed");
            metrics::record_request("none", status.as_u16(), start_time.elapsed());
            return (status, e.to_string()).into_response();
        }
    };

    let route_name = route.route.clone();
    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        route = %route_name,
        address = %route.address,
        "Dispatching request"
    );

    let request = resource_request(request, route, Some(client));
    let response = match state.loader.send_request(request).await {
        Ok(response) => into_response(response),
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                route = %route_name,
                error = %e,
                "Request failed"
            );
            error_response(&e)
        }
    };

    metrics::record_request(&route_name, response.status().as_u16(), start_time.elapsed());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayConfig, RouteConfig};
    use crate::resource::{HttpResponse, LoadError, LoadFuture, ResourceAddress, ResourceRequest};
    use crate::istream::MemoryIstream;
    use axum::http::HeaderMap;
    use std::collections::HashMap;

    /// Answers with the resolved address, or 404 for missing files.
    struct Echo;

    impl ResourceLoader for Echo {
        fn send_request(&self, request: ResourceRequest) -> LoadFuture<'_> {
            Box::pin(async move {
                match request.address {
                    ResourceAddress::Local { path } if path.ends_with("missing.txt") => {
                        Err(LoadError::NotFound(path.display().to_string()))
                    }
                    address => Ok(HttpResponse::new(
                        StatusCode::OK,
                        HeaderMap::new(),
                        Some(Box::new(MemoryIstream::new(address.to_string()))),
                    )),
                }
            })
        }
    }

    async fn serve() -> SocketAddr {
        let config = GatewayConfig::default();
        let routes = GatewayRouter::new(
            &[RouteConfig {
                name: "files".to_string(),
                path_prefix: Some("/files".to_string()),
                local_root: Some("/srv".to_string()),
                ..Default::default()
            }],
            &HashMap::new(),
        )
        .unwrap();
        let server = HttpServer::new(&config, Arc::new(routes), Arc::new(Echo));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (_tx, rx) = broadcast::channel(1);
        tokio::spawn(async move {
            let _tx = _tx;
            server.run(listener, rx).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_routes_to_loader() {
        let addr = serve().await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("http://{addr}/files/a.txt"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(response.text().await.unwrap(), "file:/srv/a.txt");

        let response = client
            .get(format!("http://{addr}/files/missing.txt"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        let response = client
            .get(format!("http://{addr}/elsewhere"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }
}
