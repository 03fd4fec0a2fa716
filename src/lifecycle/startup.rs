//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Start background tasks (monitors, cache and stock cleanup)
//! - Bind listeners and begin accepting traffic
//!
//! # Data Flow
//! ```text
//! GatewayConfig
//!     → FailureManager
//!     → StockMap<TcpStockClass> → TcpBalancer → HttpClient
//!     → DirectResourceLoader [→ CachedResourceLoader]
//!     → clusters + Router
//!     → background tasks
//!     → control API, then front server
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::shutdown::{drain, Shutdown};
use crate::cache::HttpCache;
use crate::config::GatewayConfig;
use crate::control::{control_router, ControlHandler};
use crate::health::{spawn_monitors, FailureManager};
use crate::http::{HttpClient, HttpServer};
use crate::load_balancer::{Balancer, TcpBalancer};
use crate::net::listener::parse_address;
use crate::net::{bind, load_tls_config, ListenerError};
use crate::resource::{CachedResourceLoader, DirectResourceLoader, ResourceLoader};
use crate::routing::{build_clusters, Router, RouterError};
use crate::stock::{StockMap, StockOptions, TcpStockClass};

const STOCK_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);
const STOCK_MAX_IDLE_AGE: Duration = Duration::from_secs(60);
const FAILURE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Routing(#[from] RouterError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to load TLS configuration: {0}")]
    Tls(#[source] std::io::Error),

    #[error("listener error: {0}")]
    Io(#[source] std::io::Error),
}

/// Everything a request touches, wired together.
pub struct Services {
    pub failures: Arc<FailureManager>,
    pub stock: Arc<StockMap<TcpStockClass>>,
    pub client: Arc<HttpClient>,
    pub cache: Option<Arc<HttpCache>>,
    pub loader: Arc<dyn ResourceLoader>,
    pub routes: Arc<Router>,
}

impl Services {
    pub fn build(config: &GatewayConfig) -> Result<Self, StartupError> {
        let failures = Arc::new(FailureManager::new());

        let stock = Arc::new(StockMap::new(
            Arc::new(TcpStockClass::new(Duration::from_secs(
                config.stock.connect_timeout_secs,
            ))),
            StockOptions::from(&config.stock),
        ));
        let balancer = Arc::new(TcpBalancer::new(
            Balancer::new(failures.clone()),
            stock.clone(),
            config.failure.connect_ttl(),
        ));
        let client = Arc::new(HttpClient::new(
            balancer,
            config.failure.response_ttl(),
            config.timeouts.backend(),
        ));

        let direct: Arc<dyn ResourceLoader> = Arc::new(DirectResourceLoader::new(client.clone()));
        let (cache, loader) = if config.cache.enabled {
            let cache = Arc::new(HttpCache::new(&config.cache));
            let loader: Arc<dyn ResourceLoader> =
                Arc::new(CachedResourceLoader::new(cache.clone(), direct));
            (Some(cache), loader)
        } else {
            (None, direct)
        };

        let clusters = build_clusters(&config.clusters)?;
        let routes = Arc::new(Router::new(&config.routes, &clusters)?);

        tracing::info!(
            routes = routes.len(),
            clusters = clusters.len(),
            cache = config.cache.enabled,
            "Services initialized"
        );

        Ok(Self {
            failures,
            stock,
            client,
            cache,
            loader,
            routes,
        })
    }
}

/// A started gateway: bound addresses plus the tasks to drain.
pub struct RunningGateway {
    pub services: Services,
    /// Front listener address; the configured one for TLS.
    pub front_addr: SocketAddr,
    pub control_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningGateway {
    /// Wait for every task to stop after shutdown was triggered.
    pub async fn wait(self, deadline: Duration) {
        drain(self.tasks, deadline).await;
    }
}

/// Build the services, spawn background tasks and start the listeners.
pub async fn start(
    config: &GatewayConfig,
    shutdown: &Shutdown,
) -> Result<RunningGateway, StartupError> {
    let services = Services::build(config)?;
    let mut tasks = spawn_monitors(&config.clusters, &config.monitor, &services.failures, shutdown);

    if let Some(cache) = &services.cache {
        tasks.push(tokio::spawn(
            cache
                .clone()
                .run_cleanup(config.cache.cleanup_interval(), shutdown.subscribe()),
        ));
    }
    tasks.push(tokio::spawn(services.stock.clone().run_cleanup(
        STOCK_CLEANUP_INTERVAL,
        STOCK_MAX_IDLE_AGE,
        shutdown.subscribe(),
    )));
    tasks.push(tokio::spawn(failure_cleanup(
        services.failures.clone(),
        shutdown.subscribe(),
    )));

    let control_addr = if config.admin.enabled {
        let listener = bind(&config.admin.bind_address).await?;
        let addr = listener.local_addr().ok();
        let handler = ControlHandler::new(
            services.cache.clone(),
            services.failures.clone(),
            services.stock.clone(),
            config.failure.fade_ttl(),
        );
        let app = control_router(handler, config.admin.api_key.clone());
        let mut rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.recv().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Control API failed");
            }
        }));
        addr
    } else {
        None
    };

    let server = HttpServer::new(config, services.routes.clone(), services.loader.clone());
    let front_addr = match &config.listener.tls {
        Some(tls) => {
            let tls = load_tls_config(tls).await.map_err(StartupError::Tls)?;
            let addr = parse_address(&config.listener.bind_address)?;
            let rx = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = server.run_tls(addr, tls, rx).await {
                    tracing::error!(error = %e, "HTTPS server failed");
                }
            }));
            addr
        }
        None => {
            let listener = bind(&config.listener.bind_address).await?;
            let addr = listener.local_addr().map_err(StartupError::Io)?;
            let rx = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = server.run(listener, rx).await {
                    tracing::error!(error = %e, "HTTP server failed");
                }
            }));
            addr
        }
    };

    Ok(RunningGateway {
        services,
        front_addr,
        control_addr,
        tasks,
    })
}

async fn failure_cleanup(
    failures: Arc<FailureManager>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(FAILURE_CLEANUP_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => failures.cleanup(),
            _ = shutdown.recv() => break,
        }
    }
}
