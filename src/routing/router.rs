//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up matching route for request
//! - Turn the match into a resource address (cluster or local file)
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in priority order (acceptable for typical route counts)
//! - Explicit NoMatch rather than silent default

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::HeaderName;
use axum::http::Request;

use super::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};
use crate::config::{ClusterConfig, RouteConfig};
use crate::load_balancer::AddressList;
use crate::resource::{HttpAddress, ResourceAddress};

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("route '{route}' references unknown cluster '{cluster}'")]
    UnknownCluster { route: String, cluster: String },

    #[error("route '{route}' has no target")]
    NoTarget { route: String },

    #[error("cluster '{cluster}' has invalid node address '{address}'")]
    InvalidAddress { cluster: String, address: String },

    #[error("invalid sticky header '{0}'")]
    InvalidHeader(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("no route matches")]
    NoMatch,

    #[error("invalid request path")]
    BadPath,
}

/// Node lists of all clusters, by name.
pub type Clusters = HashMap<String, Arc<AddressList>>;

pub fn build_clusters(configs: &[ClusterConfig]) -> Result<Clusters, RouterError> {
    configs
        .iter()
        .map(|cluster| {
            let nodes = cluster
                .nodes
                .iter()
                .map(|node| {
                    node.parse::<SocketAddr>()
                        .map_err(|_| RouterError::InvalidAddress {
                            cluster: cluster.name.clone(),
                            address: node.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok((cluster.name.clone(), Arc::new(AddressList::new(nodes))))
        })
        .collect()
}

#[derive(Debug)]
pub enum RouteTarget {
    Cluster {
        name: String,
        addresses: Arc<AddressList>,
    },
    Local {
        root: PathBuf,
    },
}

#[derive(Debug)]
pub struct Route {
    pub name: String,
    pub priority: u32,
    matcher: AndMatcher,
    prefix: String,
    pub target: RouteTarget,
    pub cache_tag: Option<String>,
    sticky_header: Option<HeaderName>,
}

/// Result of routing one request.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: String,
    pub address: ResourceAddress,
    pub cache_tag: Option<String>,
    pub sticky: Option<String>,
}

#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new(configs: &[RouteConfig], clusters: &Clusters) -> Result<Self, RouterError> {
        let mut routes = configs
            .iter()
            .map(|config| compile(config, clusters))
            .collect::<Result<Vec<_>, _>>()?;
        // stable: equal priorities keep configuration order
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(Self { routes })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn route(&self, req: &Request<Body>) -> Result<RouteMatch, RouteError> {
        let route = self
            .routes
            .iter()
            .find(|route| route.matcher.matches(req))
            .ok_or(RouteError::NoMatch)?;

        let address = match &route.target {
            RouteTarget::Cluster { name, addresses } => ResourceAddress::Http(HttpAddress {
                cluster: name.clone(),
                addresses: addresses.clone(),
                path: req
                    .uri()
                    .path_and_query()
                    .map(|pq| pq.as_str().to_string())
                    .unwrap_or_else(|| "/".to_string()),
            }),
            RouteTarget::Local { root } => {
                let relative = req.uri().path().strip_prefix(&route.prefix).unwrap_or("");
                ResourceAddress::Local {
                    path: local_path(root, relative)?,
                }
            }
        };

        let sticky = route.sticky_header.as_ref().and_then(|name| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });

        Ok(RouteMatch {
            route: route.name.clone(),
            address,
            cache_tag: route.cache_tag.clone(),
            sticky,
        })
    }
}

fn compile(config: &RouteConfig, clusters: &Clusters) -> Result<Route, RouterError> {
    let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
    if let Some(host) = &config.host {
        matchers.push(Box::new(HostMatcher::new(host.clone())));
    }
    if let Some(prefix) = &config.path_prefix {
        matchers.push(Box::new(PathPrefixMatcher::new(prefix.clone())));
    }

    let target = match (&config.cluster, &config.local_root) {
        (Some(cluster), None) => RouteTarget::Cluster {
            name: cluster.clone(),
            addresses: clusters
                .get(cluster)
                .cloned()
                .ok_or_else(|| RouterError::UnknownCluster {
                    route: config.name.clone(),
                    cluster: cluster.clone(),
                })?,
        },
        (None, Some(root)) => RouteTarget::Local {
            root: PathBuf::from(root),
        },
        _ => {
            return Err(RouterError::NoTarget {
                route: config.name.clone(),
            })
        }
    };

    let sticky_header = config
        .sticky_header
        .as_deref()
        .map(|name| {
            HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
                .map_err(|_| RouterError::InvalidHeader(name.to_string()))
        })
        .transpose()?;

    Ok(Route {
        name: config.name.clone(),
        priority: config.priority,
        matcher: AndMatcher::new(matchers),
        prefix: config.path_prefix.clone().unwrap_or_default(),
        target,
        cache_tag: config.cache_tag.clone(),
        sticky_header,
    })
}

/// Map a request path below `root`, refusing anything that would leave it.
fn local_path(root: &Path, relative: &str) -> Result<PathBuf, RouteError> {
    if relative.contains('\0') || relative.contains('%') || relative.contains('\\') {
        return Err(RouteError::BadPath);
    }

    let mut path = root.to_path_buf();
    for component in Path::new(relative.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return Err(RouteError::BadPath),
        }
    }

    if relative.is_empty() || relative.ends_with('/') {
        path.push("index.html");
    }
    Ok(path)
}
