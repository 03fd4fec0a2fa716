//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing clusters)
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{GatewayConfig, MonitorKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `routes[2].cluster`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            "not a socket address",
        ));
    }

    let mut cluster_names = HashSet::new();
    for (i, cluster) in config.clusters.iter().enumerate() {
        let field = format!("clusters[{i}]");
        if !cluster_names.insert(cluster.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{field}.name"),
                format!("duplicate cluster '{}'", cluster.name),
            ));
        }
        if cluster.nodes.is_empty() {
            errors.push(ValidationError::new(format!("{field}.nodes"), "no nodes"));
        }
        for node in &cluster.nodes {
            if node.parse::<SocketAddr>().is_err() {
                errors.push(ValidationError::new(
                    format!("{field}.nodes"),
                    format!("'{node}' is not a socket address"),
                ));
            }
        }
        if cluster.monitor == MonitorKind::Expect && cluster.expect.is_none() {
            errors.push(ValidationError::new(
                format!("{field}.expect"),
                "expect monitor needs an expect string",
            ));
        }
    }

    for (i, route) in config.routes.iter().enumerate() {
        let field = format!("routes[{i}]");
        match (&route.cluster, &route.local_root) {
            (Some(_), Some(_)) => errors.push(ValidationError::new(
                field.clone(),
                "cluster and local_root are mutually exclusive",
            )),
            (None, None) => errors.push(ValidationError::new(
                field.clone(),
                "needs a cluster or a local_root",
            )),
            (Some(cluster), None) if !cluster_names.contains(cluster.as_str()) => {
                errors.push(ValidationError::new(
                    format!("{field}.cluster"),
                    format!("unknown cluster '{cluster}'"),
                ))
            }
            _ => {}
        }
    }

    if config.stock.max_idle == 0 {
        errors.push(ValidationError::new("stock.max_idle", "must be greater than 0"));
    }
    if config.stock.connect_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "stock.connect_timeout_secs",
            "must be greater than 0",
        ));
    }
    if config.monitor.interval_secs == 0 {
        errors.push(ValidationError::new(
            "monitor.interval_secs",
            "must be greater than 0",
        ));
    }
    if config.monitor.timeout_secs == 0 {
        errors.push(ValidationError::new(
            "monitor.timeout_secs",
            "must be greater than 0",
        ));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new(
            "timeouts.request_secs",
            "must be greater than 0",
        ));
    }
    if config.timeouts.backend_secs == 0 {
        errors.push(ValidationError::new(
            "timeouts.backend_secs",
            "must be greater than 0",
        ));
    }
    if config.cache.enabled && config.cache.cacheable_size_limit > config.cache.max_size {
        errors.push(ValidationError::new(
            "cache.cacheable_size_limit",
            "exceeds cache.max_size",
        ));
    }
    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            "must be \"pretty\" or \"json\"",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ClusterConfig, RouteConfig};

    fn cluster(name: &str, nodes: &[&str]) -> ClusterConfig {
        ClusterConfig {
            name: name.to_string(),
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
            monitor: MonitorKind::None,
            send: None,
            expect: None,
            fade_expect: None,
            path: "/health".to_string(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GatewayConfig::default();
        config.clusters.push(cluster("api", &["not-an-address"]));
        config.routes.push(RouteConfig {
            name: "missing".to_string(),
            cluster: Some("nope".to_string()),
            ..Default::default()
        });
        config.routes.push(RouteConfig {
            name: "both".to_string(),
            cluster: Some("api".to_string()),
            local_root: Some("/srv".to_string()),
            ..Default::default()
        });
        config.monitor.interval_secs = 0;
        config.timeouts.backend_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "clusters[0].nodes",
                "routes[0].cluster",
                "routes[1]",
                "monitor.interval_secs",
                "timeouts.backend_secs"
            ]
        );
    }

    #[test]
    fn test_expect_monitor_needs_expect_string() {
        let mut config = GatewayConfig::default();
        let mut c = cluster("db", &["127.0.0.1:5432"]);
        c.monitor = MonitorKind::Expect;
        config.clusters.push(c);

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "clusters[0].expect");
    }
}
